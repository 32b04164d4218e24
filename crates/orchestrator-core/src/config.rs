use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths;

/// Guardian outage behavior (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Open,
    Closed,
}

impl Default for FailMode {
    fn default() -> Self {
        FailMode::Closed
    }
}

/// Definition of one agent process the Agent Manager (C7) starts and
/// supervises. See SPEC_FULL.md §3 `AgentDefinition`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentDefinition {
    pub agent_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub denied_tools: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_max_concurrent_subagents")]
    pub max_concurrent_subagents: u32,
    #[serde(default)]
    pub port_hint: Option<u16>,
    #[serde(default)]
    pub is_subagent: bool,
    #[serde(default)]
    pub parent_agent_id: Option<String>,
}

fn default_max_concurrent_subagents() -> u32 {
    2
}

/// One `(channel, chatId) -> agentId` binding (§3 `ChannelBinding`), as
/// declared in config rather than built up at runtime.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBindingEntry {
    pub channel: String,
    pub chat_id: String,
    pub agent_id: String,
}

/// Default destructive-tool name patterns (§9 Open Question decision).
/// Matching is case-insensitive substring against the tool's *original*
/// (unprefixed) name.
pub fn default_destructive_patterns() -> Vec<String> {
    [
        "delete", "remove", "destroy", "drop", "truncate", "purge", "wipe",
        "format", "erase", "revoke", "terminate", "kill",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Top-level, immutable configuration value built once at startup (§9:
/// "Singleton configs" redesign flag — this is a plain value threaded
/// explicitly, never a global mutable singleton).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(default = "paths::default_mcp_root")]
    pub mcp_root: PathBuf,
    #[serde(default = "paths::default_external_mcps_path")]
    pub external_mcps_path: PathBuf,
    #[serde(default = "paths::default_audit_log_path")]
    pub audit_log_path: PathBuf,
    #[serde(default)]
    pub guardian_fail_mode: FailMode,
    #[serde(default)]
    pub guardian_output_advisory: bool,
    #[serde(default = "default_destructive_patterns")]
    pub destructive_patterns: Vec<String>,
    #[serde(default = "default_sep")]
    pub tool_separator: String,
    #[serde(default)]
    pub always_prefix: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub channel_poll_interval_ms: u64,
    #[serde(default = "default_refresh_interval_ms")]
    pub channel_refresh_interval_ms: u64,
    #[serde(default = "default_max_message_age_ms")]
    pub channel_max_message_age_ms: u64,
    #[serde(default = "default_max_messages_per_cycle")]
    pub channel_max_messages_per_cycle: usize,
    #[serde(default = "default_per_parent_cap")]
    pub max_concurrent_subagents_per_parent: u32,
    #[serde(default = "default_global_cap")]
    pub max_concurrent_subagents_global: u32,
    #[serde(default = "default_subagent_timeout_minutes")]
    pub subagent_timeout_minutes_default: u64,
    #[serde(default = "default_subagent_timeout_minutes_max")]
    pub subagent_timeout_minutes_max: u64,
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// `(channel, chatId) -> agentId` routing table (§3, §4.7). A chat with
    /// no entry here falls back to the default agent.
    #[serde(default)]
    pub channel_bindings: Vec<ChannelBindingEntry>,
}

fn default_sep() -> String {
    "_".to_string()
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_refresh_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_max_message_age_ms() -> u64 {
    2 * 60 * 1000
}
fn default_max_messages_per_cycle() -> usize {
    3
}
fn default_per_parent_cap() -> u32 {
    2
}
fn default_global_cap() -> u32 {
    16
}
fn default_subagent_timeout_minutes() -> u64 {
    5
}
fn default_subagent_timeout_minutes_max() -> u64 {
    30
}
fn default_http_bind() -> String {
    "127.0.0.1:7800".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mcp_root: paths::default_mcp_root(),
            external_mcps_path: paths::default_external_mcps_path(),
            audit_log_path: paths::default_audit_log_path(),
            guardian_fail_mode: FailMode::default(),
            guardian_output_advisory: false,
            destructive_patterns: default_destructive_patterns(),
            tool_separator: default_sep(),
            always_prefix: false,
            channel_poll_interval_ms: default_poll_interval_ms(),
            channel_refresh_interval_ms: default_refresh_interval_ms(),
            channel_max_message_age_ms: default_max_message_age_ms(),
            channel_max_messages_per_cycle: default_max_messages_per_cycle(),
            max_concurrent_subagents_per_parent: default_per_parent_cap(),
            max_concurrent_subagents_global: default_global_cap(),
            subagent_timeout_minutes_default: default_subagent_timeout_minutes(),
            subagent_timeout_minutes_max: default_subagent_timeout_minutes_max(),
            http_bind: default_http_bind(),
            agents: Vec::new(),
            channel_bindings: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a JSON file if it exists, overlaying a handful of
    /// env-var overrides, mirroring `openclaw-gateway::config::GatewayConfig::from_file_or_env`'s
    /// layering.
    pub fn from_file_or_env(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(root) = std::env::var("ORCHESTRATOR_MCP_ROOT") {
            config.mcp_root = PathBuf::from(root);
        }
        if let Ok(bind) = std::env::var("ORCHESTRATOR_HTTP_BIND") {
            config.http_bind = bind;
        }
        if let Ok(mode) = std::env::var("ORCHESTRATOR_GUARDIAN_FAIL_MODE") {
            config.guardian_fail_mode = match mode.to_lowercase().as_str() {
                "open" => FailMode::Open,
                _ => FailMode::Closed,
            };
        }

        Ok(config)
    }

    pub fn from_env() -> Self {
        Self::from_file_or_env(&paths::orchestrator_home().join("orchestrator.json"))
            .unwrap_or_default()
    }

    /// Checks whether an env-var disable switch is set for a discovered MCP
    /// (§6 "Env-var disable switch"): `<NAME>_MCP_ENABLED=false`.
    pub fn mcp_env_disabled(name: &str) -> bool {
        let key = format!("{}_MCP_ENABLED", name.to_uppercase());
        matches!(std::env::var(&key).as_deref(), Ok("false") | Ok("0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.tool_separator, "_");
        assert!(!config.always_prefix);
        assert_eq!(config.guardian_fail_mode, FailMode::Closed);
        assert_eq!(config.channel_max_messages_per_cycle, 3);
        assert!(!config.destructive_patterns.is_empty());
    }

    #[test]
    fn parse_channel_bindings() {
        let json = r#"{"channelBindings": [{"channel": "telegram", "chatId": "123", "agentId": "support"}]}"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channel_bindings.len(), 1);
        assert_eq!(config.channel_bindings[0].chat_id, "123");
        assert_eq!(config.channel_bindings[0].agent_id, "support");
    }

    #[test]
    fn parse_minimal_json() {
        let json = r#"{"httpBind": "0.0.0.0:9000", "alwaysPrefix": true}"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.http_bind, "0.0.0.0:9000");
        assert!(config.always_prefix);
        assert_eq!(config.tool_separator, "_");
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let config = OrchestratorConfig::from_file_or_env(Path::new("/nonexistent/path.json")).unwrap();
        assert_eq!(config.http_bind, default_http_bind());
    }

    #[test]
    fn load_from_tempfile() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("orchestrator.json");
        std::fs::write(&path, r#"{"mcpRoot": "/tmp/mcps"}"#).unwrap();
        let config = OrchestratorConfig::from_file_or_env(&path).unwrap();
        assert_eq!(config.mcp_root, PathBuf::from("/tmp/mcps"));
    }

    #[test]
    fn mcp_env_disabled_checks_suffix() {
        std::env::set_var("MAIL_MCP_ENABLED", "false");
        assert!(OrchestratorConfig::mcp_env_disabled("mail"));
        std::env::set_var("MAIL_MCP_ENABLED", "true");
        assert!(!OrchestratorConfig::mcp_env_disabled("mail"));
        std::env::remove_var("MAIL_MCP_ENABLED");
    }
}
