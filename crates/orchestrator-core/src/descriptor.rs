use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where an `MCPDescriptor` was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Internal,
    ExternalStdio,
    ExternalHttp,
}

/// MCP role (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpRole {
    #[default]
    Default,
    Guardian,
    Channel,
}

/// Per-channel-role tuning (§3 `channelConfig`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub bot_patterns: Vec<String>,
    pub chat_refresh_interval_ms: Option<u64>,
    pub max_message_age_ms: Option<u64>,
}

/// How to reach the MCP child: stdio spawn spec or an HTTP base.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entrypoint {
    Stdio {
        command: String,
        #[serde(default)]
        argv: Vec<String>,
        working_directory: Option<PathBuf>,
        #[serde(default)]
        env_overrides: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// A runnable MCP, as produced by the Scanner (C2) or the External Loader (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpDescriptor {
    pub name: String,
    pub origin: Origin,
    pub entrypoint: Entrypoint,
    pub timeout_ms: u64,
    pub required: bool,
    pub sensitive: bool,
    pub role: McpRole,
    pub channel_config: Option<ChannelConfig>,
    pub allow_destructive_tools: bool,
    /// Per-MCP default Guardian scan flags (manifest `guardianScan`).
    pub guardian_input: bool,
    pub guardian_output: bool,
}

impl McpDescriptor {
    pub fn is_guardian(&self) -> bool {
        self.role == McpRole::Guardian
    }

    pub fn is_channel(&self) -> bool {
        self.role == McpRole::Channel
    }
}
