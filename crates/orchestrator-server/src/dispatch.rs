//! Orchestrator Server (C9, §4.9): the front MCP interface. Merges
//! passthrough tools from the route table with a handful of built-in
//! custom tools, and is the single place caller identity (`_meta.agentId`)
//! is read off a request. Grounded in `openclaw-mcp::server::McpServer`'s
//! method-dispatch shape, generalized from a single static tool list to a
//! router-backed, per-agent-filtered one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;

use orchestrator_agents::AgentManager;
use orchestrator_agents::SubagentSupervisor;
use orchestrator_core::{ErrorEnvelope, OrchError, OrchestratorConfig};
use orchestrator_mcp::{CallOutcome, McpClient, ToolCallResult, ToolDefinition, ToolsListResult};
use orchestrator_router::{resolve, GuardianPipeline, RouteTable, ToolPolicy};
use serde_json::{json, Value};
use tracing::warn;

use crate::custom_tools::{self, CUSTOM_TOOL_NAMES};

pub struct OrchestratorServer {
    routes: StdRwLock<Arc<RouteTable>>,
    mcp_clients: StdRwLock<Arc<HashMap<String, McpClient>>>,
    guardian: Arc<GuardianPipeline>,
    agent_policies: StdRwLock<Arc<HashMap<String, ToolPolicy>>>,
    agents: Arc<AgentManager>,
    subagents: Arc<SubagentSupervisor>,
    config: Arc<OrchestratorConfig>,
    started_at: Instant,
}

impl OrchestratorServer {
    pub fn new(
        routes: Arc<RouteTable>,
        mcp_clients: HashMap<String, McpClient>,
        guardian: Arc<GuardianPipeline>,
        agent_policies: HashMap<String, ToolPolicy>,
        agents: Arc<AgentManager>,
        subagents: Arc<SubagentSupervisor>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            routes: StdRwLock::new(routes),
            mcp_clients: StdRwLock::new(Arc::new(mcp_clients)),
            guardian,
            agent_policies: StdRwLock::new(Arc::new(agent_policies)),
            agents,
            subagents,
            config,
            started_at: Instant::now(),
        }
    }

    /// Swaps in a freshly-built route table (§5 "read-heavy, rebuilt on
    /// membership change"): readers never block on this.
    pub fn update_routes(&self, routes: Arc<RouteTable>) {
        *self.routes.write().unwrap() = routes;
    }

    pub fn update_clients(&self, clients: HashMap<String, McpClient>) {
        *self.mcp_clients.write().unwrap() = Arc::new(clients);
    }

    pub fn update_agent_policies(&self, policies: HashMap<String, ToolPolicy>) {
        *self.agent_policies.write().unwrap() = Arc::new(policies);
    }

    pub fn route_snapshot(&self) -> Arc<RouteTable> {
        self.routes.read().unwrap().clone()
    }

    pub fn client_snapshot(&self) -> Arc<HashMap<String, McpClient>> {
        self.mcp_clients.read().unwrap().clone()
    }

    pub fn agents(&self) -> &Arc<AgentManager> {
        &self.agents
    }

    pub fn subagents(&self) -> &Arc<SubagentSupervisor> {
        &self.subagents
    }

    pub fn guardian(&self) -> &Arc<GuardianPipeline> {
        &self.guardian
    }

    pub fn config(&self) -> &Arc<OrchestratorConfig> {
        &self.config
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// `tools/list` (§4.9): passthrough tools filtered by the caller's
    /// policy, plus the always-visible custom tools.
    pub fn list_tools(&self, agent_id: Option<&str>) -> ToolsListResult {
        let routes = self.route_snapshot();
        let policies = self.agent_policies.read().unwrap().clone();
        let policy = agent_id.and_then(|id| policies.get(id));

        let mut tools: Vec<ToolDefinition> = routes
            .filtered_for(policy)
            .into_iter()
            .map(|route| ToolDefinition {
                name: route.exposed_name.clone(),
                description: format!("passthrough to '{}'", route.mcp_name),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect();
        tools.extend(custom_tools::custom_tool_definitions());
        ToolsListResult { tools }
    }

    /// `tools/call` (§4.9/§6). Returns the wire-ready [`ToolCallResult`]
    /// directly; errors are already folded into its `isError`/content shape.
    pub async fn call_tool(&self, name: &str, arguments: Value, agent_id: Option<&str>) -> ToolCallResult {
        if CUSTOM_TOOL_NAMES.contains(&name) {
            return custom_tools::dispatch(self, name, arguments, agent_id).await;
        }

        let routes = self.route_snapshot();
        let policies = self.agent_policies.read().unwrap().clone();
        let policy = agent_id.and_then(|id| policies.get(id));

        let route = match resolve(&routes, name, policy, agent_id) {
            Ok(route) => route.clone(),
            Err(e) => return error_result(&e),
        };

        let clients = self.client_snapshot();
        let Some(client) = clients.get(&route.mcp_name).cloned() else {
            return error_result(&OrchError::configuration(format!(
                "route for '{}' points at unknown mcp '{}'",
                name, route.mcp_name
            )));
        };

        let original_name = route.original_name.clone();
        let mcp_name = route.mcp_name.clone();
        let outcome = self
            .guardian
            .dispatch(&original_name, &mcp_name, agent_id, arguments, |args| async move {
                client.call_tool(&original_name, args).await
            })
            .await;

        match outcome {
            Ok(mut result) => {
                apply_response_hints(&mut result, route.response_hints.as_ref());
                apply_required_tools_warning(&mut result, &routes);
                result
            }
            Err(e) => error_result(&e),
        }
    }
}

/// §4.4: when a route carries response hints and the call succeeded with a
/// JSON object body, fold the hints in under `_hints` rather than replacing
/// the tool's own response.
fn apply_response_hints(result: &mut ToolCallResult, hints: Option<&Value>) {
    let Some(hints) = hints else { return };
    if result.is_error == Some(true) {
        return;
    }
    let Some(text) = result.text() else { return };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => {
            map.insert("_hints".to_string(), hints.clone());
            *result = ToolCallResult::success(serde_json::to_string(&Value::Object(map)).unwrap_or_default());
        }
        _ => {}
    }
}

/// §4.9: cross-check a tool response's `required_tools` against the live
/// catalog and annotate unknown ones, applying to any passthrough tool
/// whose response happens to carry that field (e.g. `memory_store_skill`).
fn apply_required_tools_warning(result: &mut ToolCallResult, routes: &RouteTable) {
    if result.is_error == Some(true) {
        return;
    }
    let Some(text) = result.text() else { return };
    let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(text) else { return };
    let Some(Value::Array(required)) = map.get("required_tools").cloned() else { return };

    let unknown: Vec<String> = required
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|name| routes.get(name).is_none())
        .map(String::from)
        .collect();

    if !unknown.is_empty() {
        warn!(?unknown, "tool response named unknown required_tools");
        map.insert(
            "toolCatalogWarning".to_string(),
            json!(format!("unknown required tools: {}", unknown.join(", "))),
        );
        *result = ToolCallResult::success(serde_json::to_string(&Value::Object(map)).unwrap_or_default());
    }
}

/// §6/§7: the single place an `OrchError` becomes wire JSON.
pub fn error_result(err: &OrchError) -> ToolCallResult {
    let envelope = ErrorEnvelope::from(err);
    ToolCallResult::error(serde_json::to_string(&envelope).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::FailMode;
    use orchestrator_router::{GuardianFlags, McpToolSource};

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
            tools: vec![tool("write")],
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

    #[test]
    fn list_tools_always_includes_custom_tools() {
        let server = server();
        let listing = server.list_tools(None);
        let names: Vec<&str> = listing.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"write"));
        assert!(names.contains(&"get_status"));
        assert!(names.contains(&"spawn_subagent"));
    }

    #[tokio::test]
    async fn calling_unknown_tool_is_a_denial_envelope() {
        let server = server();
        let result = server.call_tool("nope", json!({}), None).await;
        assert_eq!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn calling_route_with_no_backing_client_reports_configuration_error() {
        let server = server();
        let result = server.call_tool("write", json!({}), None).await;
        assert_eq!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(result.text().unwrap()).unwrap();
        assert!(body["error"].as_str().unwrap().contains("unknown mcp"));
    }
}
