//! On-disk manifest shape recognized by the Scanner (C2) — SPEC_FULL.md §6
//! "MCP manifest". Modeled after `openclaw-agent::tools::script_plugin::PluginManifest`:
//! a small `serde`-derived struct describing a runnable child, loaded one
//! directory at a time.

use std::collections::HashMap;

use serde::Deserialize;

pub const MANIFEST_FILE_NAME: &str = "mcp.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelManifest {
    #[serde(default)]
    pub bot_patterns: Vec<String>,
    pub chat_refresh_interval_ms: Option<u64>,
    pub max_message_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardianScanManifest {
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub output: bool,
}

/// Parsed form of `mcp.json` found in one immediate child of the MCP root.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpManifest {
    pub mcp_name: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub role: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub channel: Option<ChannelManifest>,
    #[serde(default)]
    pub guardian_scan: GuardianScanManifest,
    #[serde(default)]
    pub allow_destructive_tools: bool,
}

fn default_transport() -> String {
    "stdio".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_manifest_parses() {
        let json = r#"{"mcpName": "mail", "command": "node", "args": ["index.js"]}"#;
        let m: McpManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.mcp_name, "mail");
        assert_eq!(m.transport, "stdio");
        assert_eq!(m.timeout, 15_000);
        assert!(m.enabled);
        assert!(!m.required);
    }

    #[test]
    fn channel_manifest_parses() {
        let json = r#"{
            "mcpName": "telegram",
            "command": "node",
            "role": "channel",
            "channel": {"botPatterns": ["/bot "], "chatRefreshIntervalMs": 300000}
        }"#;
        let m: McpManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.role, "channel");
        let channel = m.channel.unwrap();
        assert_eq!(channel.bot_patterns, vec!["/bot ".to_string()]);
        assert_eq!(channel.chat_refresh_interval_ms, Some(300_000));
    }

    #[test]
    fn disabled_manifest_parses_enabled_false() {
        let json = r#"{"mcpName": "x", "command": "y", "enabled": false}"#;
        let m: McpManifest = serde_json::from_str(json).unwrap();
        assert!(!m.enabled);
    }
}
