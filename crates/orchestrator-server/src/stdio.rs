//! Front MCP transport over stdio (§4.9 `[AMBIENT] Transport`). Grounded in
//! `openclaw-mcp::transport::stdio::run_stdio`'s newline-delimited
//! JSON-RPC loop, generalized to dispatch through [`OrchestratorServer`]
//! instead of a single `McpContext`, and to read caller identity off
//! `_meta.agentId` on every request (§4.9).

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use orchestrator_mcp::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo,
    ToolsCapability, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};

use crate::dispatch::OrchestratorServer;
use crate::metrics::ServerMetrics;

fn meta_agent_id(params: &serde_json::Value) -> Option<String> {
    params
        .get("_meta")
        .and_then(|m| m.get("agentId"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Handle one already-parsed request, shared by both the stdio and HTTP+SSE
/// front transports.
pub async fn handle_request(
    server: &OrchestratorServer,
    metrics: &ServerMetrics,
    request: &JsonRpcRequest,
) -> JsonRpcResponse {
    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            request.id.clone(),
            serde_json::to_value(InitializeResult {
                protocol_version: "2024-11-05".to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability { list_changed: Some(true) }),
                },
                server_info: ServerInfo {
                    name: "orchestrator".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            })
            .unwrap_or_default(),
        ),
        "ping" => JsonRpcResponse::success(request.id.clone(), serde_json::json!({})),
        "tools/list" => {
            let params = request.params.clone().unwrap_or_default();
            let agent_id = meta_agent_id(&params);
            let result = server.list_tools(agent_id.as_deref());
            JsonRpcResponse::success(request.id.clone(), serde_json::to_value(result).unwrap_or_default())
        }
        "tools/call" => {
            let Some(params) = &request.params else {
                return JsonRpcResponse::error(request.id.clone(), INVALID_PARAMS, "missing params");
            };
            let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                return JsonRpcResponse::error(request.id.clone(), INVALID_PARAMS, "missing tool name");
            };
            let arguments = params.get("arguments").cloned().unwrap_or(serde_json::json!({}));
            let agent_id = meta_agent_id(params);

            metrics.record_call();
            let result = server.call_tool(name, arguments, agent_id.as_deref()).await;
            if result.is_error == Some(true) {
                metrics.record_error();
                if let Some(body) = result.text().and_then(|t| serde_json::from_str::<serde_json::Value>(t).ok()) {
                    if body.get("blocked").and_then(|v| v.as_bool()) == Some(true) {
                        metrics.record_blocked();
                    } else if body.get("denied").and_then(|v| v.as_bool()) == Some(true) {
                        metrics.record_denied();
                    }
                }
            }
            JsonRpcResponse::success(request.id.clone(), serde_json::to_value(result).unwrap_or_default())
        }
        "shutdown" => JsonRpcResponse::success(request.id.clone(), serde_json::json!({})),
        other => {
            info!(method = other, "front server: unknown method");
            JsonRpcResponse::error(request.id.clone(), METHOD_NOT_FOUND, format!("method not found: {}", other))
        }
    }
}

/// Run the front MCP server over stdin/stdout, one newline-delimited
/// JSON-RPC frame per line, until stdin closes or `shutdown` resolves
/// (§4.10 step 9).
pub async fn run_stdio(
    server: &OrchestratorServer,
    metrics: &ServerMetrics,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    info!("orchestrator front server: stdio transport starting");
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "front server: stdin read error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                let resp = JsonRpcResponse::error(None, PARSE_ERROR, format!("parse error: {}", e));
                write_line(&mut stdout, &resp).await?;
                continue;
            }
        };

        if request.id.is_none() {
            info!(method = %request.method, "front server: notification");
            continue;
        }

        let response = handle_request(server, metrics, &request).await;
        let shutting_down = request.method == "shutdown";
        write_line(&mut stdout, &response).await?;
        if shutting_down {
            break;
        }
    }

    info!("orchestrator front server: stdio transport stopped");
    Ok(())
}

async fn write_line(stdout: &mut tokio::io::Stdout, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let out = serde_json::to_string(response)?;
    stdout.write_all(out.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_agents::{AgentManager, SubagentSupervisor};
    use orchestrator_core::{FailMode, OrchestratorConfig};
    use orchestrator_router::{GuardianFlags, GuardianPipeline, McpToolSource, RouteTable};
    use orchestrator_mcp::ToolDefinition;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn server() -> OrchestratorServer {
        let sources = vec![McpToolSource {
            mcp_name: "A".to_string(),
            allow_destructive_tools: false,
            tools: vec![ToolDefinition {
                name: "write".to_string(),
                description: String::new(),
                input_schema: serde_json::json!({}),
            }],
        }];
        let config = OrchestratorConfig::default();
        let routes = Arc::new(RouteTable::build(&sources, &config));
        let tmp = tempfile::TempDir::new().unwrap();
        let guardian = Arc::new(GuardianPipeline::new(
            None,
            FailMode::Closed,
            false,
            GuardianFlags::new(false, false),
            tmp.path().join("audit.jsonl"),
        ));
        let agents = Arc::new(AgentManager::new("stdio://orchestrator"));
        let subagents = Arc::new(SubagentSupervisor::new(agents.clone(), &config, "stdio://orchestrator"));
        OrchestratorServer::new(routes, HashMap::new(), guardian, HashMap::new(), agents, subagents, Arc::new(config))
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let server = server();
        let metrics = ServerMetrics::new();
        let req = JsonRpcRequest::new(serde_json::json!(1), "initialize", None);
        let resp = handle_request(&server, &metrics, &req).await;
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
    }

    #[tokio::test]
    async fn tools_list_reads_agent_id_from_meta() {
        let server = server();
        let metrics = ServerMetrics::new();
        let req = JsonRpcRequest::new(
            serde_json::json!(1),
            "tools/list",
            Some(serde_json::json!({"_meta": {"agentId": "agent-1"}})),
        );
        let resp = handle_request(&server, &metrics, &req).await;
        assert!(resp.result.is_some());
    }

    #[tokio::test]
    async fn tools_call_records_metrics_on_error() {
        let server = server();
        let metrics = ServerMetrics::new();
        let req = JsonRpcRequest::new(
            serde_json::json!(1),
            "tools/call",
            Some(serde_json::json!({"name": "nope", "arguments": {}})),
        );
        let _ = handle_request(&server, &metrics, &req).await;
        assert_eq!(metrics.tool_calls_total.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(metrics.tool_errors_total.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let server = server();
        let metrics = ServerMetrics::new();
        let req = JsonRpcRequest::new(serde_json::json!(1), "frobnicate", None);
        let resp = handle_request(&server, &metrics, &req).await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
