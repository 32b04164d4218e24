//! Tool Router (C4): aggregates each MCP's tool catalog into a single
//! namespaced route table, gates destructive tools, resolves name
//! collisions, and dispatches per-call policy checks. Generalizes
//! `openclaw_core::skills`'s flat-catalog-with-collision-handling shape
//! (one list in, one lookup table out) to a multi-source, policy-aware table.

use std::collections::{HashMap, HashSet};

use orchestrator_core::{OrchError, OrchestratorConfig};
use orchestrator_mcp::ToolDefinition;
use serde_json::Value;

/// One MCP's contribution to the catalog, pre-filtered to the tools its
/// owner actually exposes right now (§4.4 "Discovery").
pub struct McpToolSource {
    pub mcp_name: String,
    pub allow_destructive_tools: bool,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone)]
pub struct ToolRoute {
    pub exposed_name: String,
    pub original_name: String,
    pub mcp_name: String,
    pub is_destructive: bool,
    pub response_hints: Option<Value>,
}

/// Case-insensitive substring match against the configured destructive
/// pattern set (§3 "Destructive classification").
pub fn is_destructive(tool_name: &str, patterns: &[String]) -> bool {
    let lower = tool_name.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, ToolRoute>,
    /// `<mcp>:<tool>` pairs omitted from the catalog by destructive gating.
    blocked: Vec<String>,
}

impl RouteTable {
    pub fn build(sources: &[McpToolSource], config: &OrchestratorConfig) -> Self {
        let mut blocked = Vec::new();
        let mut surviving: Vec<(&str, &ToolDefinition)> = Vec::new();

        for source in sources {
            for tool in &source.tools {
                if is_destructive(&tool.name, &config.destructive_patterns)
                    && !source.allow_destructive_tools
                {
                    blocked.push(format!("{}:{}", source.mcp_name, tool.name));
                    continue;
                }
                surviving.push((source.mcp_name.as_str(), tool));
            }
        }

        let mut name_counts: HashMap<&str, u32> = HashMap::new();
        for (_, tool) in &surviving {
            *name_counts.entry(tool.name.as_str()).or_insert(0) += 1;
        }

        let mut routes = HashMap::new();
        for (mcp_name, tool) in surviving {
            let collides = name_counts.get(tool.name.as_str()).copied().unwrap_or(0) > 1;
            let exposed_name = if config.always_prefix || collides {
                format!("{}{}{}", mcp_name, config.tool_separator, tool.name)
            } else {
                tool.name.clone()
            };
            routes.insert(
                exposed_name.clone(),
                ToolRoute {
                    exposed_name,
                    original_name: tool.name.clone(),
                    mcp_name: mcp_name.to_string(),
                    is_destructive: is_destructive(&tool.name, &config.destructive_patterns),
                    response_hints: None,
                },
            );
        }

        Self { routes, blocked }
    }

    pub fn get(&self, exposed_name: &str) -> Option<&ToolRoute> {
        self.routes.get(exposed_name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn blocked(&self) -> &[String] {
        &self.blocked
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolRoute> {
        self.routes.values()
    }

    /// Route names, sorted, truncated for use in an `UnknownTool` error
    /// sample so the envelope stays small (§4.4 "truncated").
    pub fn catalog_sample(&self, limit: usize) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names.truncate(limit);
        names
    }

    /// Tool definitions visible to a given policy, in router-native form
    /// (exposed name swapped in for the original).
    pub fn filtered_for(&self, policy: Option<&ToolPolicy>) -> Vec<&ToolRoute> {
        self.routes
            .values()
            .filter(|r| policy.map(|p| p.is_allowed(&r.exposed_name)).unwrap_or(true))
            .collect()
    }
}

/// An agent's allow/deny tool-name globs (§3 `AgentDefinition`). Deny wins
/// on overlap (pinned decision, §9).
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allowed: Option<globset::GlobSet>,
    denied: globset::GlobSet,
}

impl ToolPolicy {
    pub fn new(allowed_tools: Option<&[String]>, denied_tools: &[String]) -> Self {
        let allowed = allowed_tools.map(|patterns| build_globset(patterns));
        let denied = build_globset(denied_tools);
        Self { allowed, denied }
    }

    pub fn is_allowed(&self, exposed_name: &str) -> bool {
        if self.denied.is_match(exposed_name) {
            return false;
        }
        match &self.allowed {
            Some(set) => set.is_match(exposed_name),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> globset::GlobSet {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = globset::Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| globset::GlobSetBuilder::new().build().unwrap())
}

/// `routeToolCall` step 1 + 2 (§4.4): resolve the route and enforce policy.
/// Does not dispatch — the caller (the Guardian pipeline, or the router
/// crate's dispatch helper in `orchestrator-server`) owns the actual
/// `McpClient::call_tool` invocation so it can interpose scanning.
pub fn resolve<'a>(
    table: &'a RouteTable,
    exposed_name: &str,
    policy: Option<&ToolPolicy>,
    agent_id: Option<&str>,
) -> Result<&'a ToolRoute, OrchError> {
    let route = table
        .get(exposed_name)
        .ok_or_else(|| OrchError::unknown_tool(exposed_name, table.catalog_sample(20)))?;

    if let Some(policy) = policy {
        if !policy.is_allowed(exposed_name) {
            let agent_id = agent_id.unwrap_or("unknown").to_string();
            return Err(OrchError::policy_denied(exposed_name, agent_id));
        }
    }

    Ok(route)
}

/// Tool names with duplicates across two or more MCPs, reported for
/// observability only (the route table resolves these transparently).
pub fn collisions(sources: &[McpToolSource]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dupes = HashSet::new();
    for source in sources {
        for tool in &source.tools {
            if !seen.insert(tool.name.clone()) {
                dupes.insert(tool.name.clone());
            }
        }
    }
    let mut out: Vec<String> = dupes.into_iter().collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_mcp::ToolDefinition;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({}),
        }
    }

    fn source(mcp: &str, tools: Vec<&str>, allow_destructive: bool) -> McpToolSource {
        McpToolSource {
            mcp_name: mcp.to_string(),
            allow_destructive_tools: allow_destructive,
            tools: tools.into_iter().map(tool).collect(),
        }
    }

    /// S1 from the scenario catalog: `A` exposes `read`/`write`, `B` exposes
    /// `read`/`delete`; `B`'s `delete` is never opted in to destructive
    /// tools, so it is blocked outright rather than prefixed.
    #[test]
    fn s1_collision_and_destructive_gating() {
        let sources = vec![
            source("A", vec!["read", "write"], false),
            source("B", vec!["read", "delete"], false),
        ];
        let config = OrchestratorConfig::default();
        let table = RouteTable::build(&sources, &config);

        assert!(table.get("A_write").is_none(), "sole owner stays bare");
        assert!(table.get("write").is_some());
        assert!(table.get("A_read").is_some());
        assert!(table.get("B_read").is_some());
        assert!(table.get("read").is_none());
        assert!(table.get("delete").is_none());
        assert!(table.get("B_delete").is_none());
        assert_eq!(table.blocked(), &["B:delete".to_string()]);
    }

    #[test]
    fn sole_owner_tool_stays_unprefixed() {
        let sources = vec![source("A", vec!["write"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        assert!(table.get("write").is_some());
        assert!(table.get("A_write").is_none());
    }

    #[test]
    fn colliding_tool_is_prefixed_on_both_sides() {
        let sources = vec![source("A", vec!["read"], false), source("B", vec!["read"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        assert!(table.get("read").is_none());
        assert!(table.get("A_read").is_some());
        assert!(table.get("B_read").is_some());
    }

    #[test]
    fn destructive_tool_blocked_unless_opted_in() {
        let sources = vec![source("B", vec!["delete"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        assert!(table.get("delete").is_none());
        assert_eq!(table.blocked(), &["B:delete".to_string()]);
    }

    #[test]
    fn destructive_tool_allowed_when_opted_in() {
        let sources = vec![source("B", vec!["delete"], true)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        assert!(table.get("delete").is_some());
        assert!(table.blocked().is_empty());
    }

    #[test]
    fn always_prefix_applies_even_without_collision() {
        let mut config = OrchestratorConfig::default();
        config.always_prefix = true;
        let sources = vec![source("A", vec!["write"], false)];
        let table = RouteTable::build(&sources, &config);
        assert!(table.get("A_write").is_some());
        assert!(table.get("write").is_none());
    }

    #[test]
    fn unknown_tool_reports_a_catalog_sample() {
        let sources = vec![source("A", vec!["write"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        let err = resolve(&table, "nope", None, None).unwrap_err();
        match err {
            OrchError::UnknownTool { catalog_sample, .. } => {
                assert_eq!(catalog_sample, vec!["write".to_string()]);
            }
            _ => panic!("expected UnknownTool"),
        }
    }

    #[test]
    fn deny_wins_on_overlap() {
        let policy = ToolPolicy::new(Some(&["*".to_string()]), &["A_write".to_string()]);
        assert!(!policy.is_allowed("A_write"));
        assert!(policy.is_allowed("A_read"));
    }

    #[test]
    fn policy_denial_surfaces_agent_and_tool() {
        let sources = vec![source("A", vec!["write"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        let policy = ToolPolicy::new(None, &["write".to_string()]);
        let err = resolve(&table, "write", Some(&policy), Some("agent-1")).unwrap_err();
        assert_eq!(err.to_string(), "Tool 'write' is not available for agent 'agent-1'");
    }

    #[test]
    fn no_policy_means_unrestricted() {
        let sources = vec![source("A", vec!["write"], false)];
        let table = RouteTable::build(&sources, &OrchestratorConfig::default());
        assert!(resolve(&table, "write", None, None).is_ok());
    }
}
