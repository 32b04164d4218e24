//! Built-in custom tools (§4.7/§4.8/§4.9): always visible to every agent,
//! dispatched before the route table is even consulted. Grounded in
//! `openclaw-mcp::server::McpServer`'s handful of hardcoded tool handlers,
//! generalized to read off the Orchestrator's own live state rather than a
//! single agent's.

use orchestrator_core::OrchError;
use serde_json::{json, Value};

use crate::dispatch::{error_result, OrchestratorServer};
use orchestrator_mcp::{ToolCallResult, ToolDefinition};

pub const CUSTOM_TOOL_NAMES: &[&str] =
    &["get_status", "spawn_subagent", "system_health_check", "get_tool_catalog"];

pub fn custom_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_status".to_string(),
            description: "List every agent runtime and its current state".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "spawn_subagent".to_string(),
            description: "Spawn a short-lived subagent to perform one task and return its result".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "timeoutMinutes": {"type": "integer"},
                    "allowedToolsHint": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["task"]
            }),
        },
        ToolDefinition {
            name: "system_health_check".to_string(),
            description: "Report per-MCP availability across the whole fleet".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "get_tool_catalog".to_string(),
            description: "Return the full route table, including blocked destructive tools".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
    ]
}

/// Single entry point for every custom tool (§4.9 "if it is a custom tool,
/// invoke its handler"). `agent_id` is the caller identity read off
/// `_meta.agentId` by the front transport, not a tool argument.
pub async fn dispatch(
    server: &OrchestratorServer,
    name: &str,
    arguments: Value,
    agent_id: Option<&str>,
) -> ToolCallResult {
    let result = match name {
        "get_status" => get_status(server).await,
        "spawn_subagent" => spawn_subagent(server, arguments, agent_id).await,
        "system_health_check" => system_health_check(server).await,
        "get_tool_catalog" => get_tool_catalog(server).await,
        other => Err(OrchError::unknown_tool(other, vec![])),
    };

    match result {
        Ok(body) => ToolCallResult::success(body),
        Err(e) => error_result(&e),
    }
}

async fn get_status(server: &OrchestratorServer) -> Result<String, OrchError> {
    let statuses = server.agents().statuses().await;
    serde_json::to_string(&json!({"success": true, "agents": statuses}))
        .map_err(|e| OrchError::configuration(e.to_string()))
}

async fn spawn_subagent(
    server: &OrchestratorServer,
    arguments: Value,
    agent_id: Option<&str>,
) -> Result<String, OrchError> {
    let caller = agent_id.ok_or_else(|| OrchError::validation("spawn_subagent requires a caller agentId"))?;
    let task = arguments
        .get("task")
        .and_then(Value::as_str)
        .ok_or_else(|| OrchError::validation("spawn_subagent requires a 'task' string"))?;
    let timeout_minutes = arguments.get("timeoutMinutes").and_then(Value::as_u64);
    let allowed_tools_hint = arguments.get("allowedToolsHint").and_then(Value::as_array).map(|arr| {
        arr.iter().filter_map(|v| v.as_str()).map(String::from).collect::<Vec<_>>()
    });

    let response = server
        .subagents()
        .spawn_subagent(caller, task, timeout_minutes, allowed_tools_hint)
        .await?;

    serde_json::to_string(&json!({"success": true, "response": response}))
        .map_err(|e| OrchError::configuration(e.to_string()))
}

async fn system_health_check(server: &OrchestratorServer) -> Result<String, OrchError> {
    let clients = server.client_snapshot();
    let mut report = Vec::with_capacity(clients.len());
    for (name, client) in clients.iter() {
        report.push(json!({
            "mcp": name,
            "available": client.is_available().await,
            "state": client.state().await,
        }));
    }
    report.sort_by(|a, b| a["mcp"].as_str().cmp(&b["mcp"].as_str()));
    serde_json::to_string(&json!({"success": true, "mcps": report}))
        .map_err(|e| OrchError::configuration(e.to_string()))
}

async fn get_tool_catalog(server: &OrchestratorServer) -> Result<String, OrchError> {
    let routes = server.route_snapshot();
    let catalog: Vec<Value> = routes
        .all()
        .map(|r| {
            json!({
                "exposedName": r.exposed_name,
                "originalName": r.original_name,
                "mcp": r.mcp_name,
                "destructive": r.is_destructive,
            })
        })
        .collect();
    serde_json::to_string(&json!({
        "success": true,
        "tools": catalog,
        "blocked": routes.blocked(),
    }))
    .map_err(|e| OrchError::configuration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_agents::{AgentManager, SubagentSupervisor};
    use orchestrator_core::{FailMode, OrchestratorConfig};
    use orchestrator_router::{GuardianFlags, GuardianPipeline, McpToolSource, RouteTable};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({}),
        }
    }

    fn server() -> OrchestratorServer {
        let sources = vec![McpToolSource {
            mcp_name: "A".to_string(),
            allow_destructive_tools: false,
            tools: vec![tool("write"), tool("delete")],
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
    async fn get_status_reports_empty_fleet() {
        let server = server();
        let result = dispatch(&server, "get_status", json!({}), None).await;
        assert_eq!(result.is_error, None);
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["agents"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn spawn_subagent_without_caller_is_validation_error() {
        let server = server();
        let result = dispatch(&server, "spawn_subagent", json!({"task": "do x"}), None).await;
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn get_tool_catalog_reports_blocked_destructive_tool() {
        let server = server();
        let result = dispatch(&server, "get_tool_catalog", json!({}), None).await;
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["blocked"].as_array().unwrap(), &vec![json!("A:delete")]);
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn system_health_check_reports_no_mcps_when_none_registered() {
        let server = server();
        let result = dispatch(&server, "system_health_check", json!({}), None).await;
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["mcps"].as_array().unwrap().len(), 0);
    }
}
