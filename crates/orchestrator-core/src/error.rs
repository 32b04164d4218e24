//! The closed error vocabulary used at every outward-facing edge.
//!
//! Internal code is free to propagate `anyhow::Error` (as `openclaw-mcp` and
//! `openclaw-agent` do throughout); whenever an error crosses a boundary that a caller
//! can observe — a tool-call response, an HTTP status body — it is first
//! classified into one of these kinds so the envelope shape stays stable.

use std::fmt;

/// The outward-facing error vocabulary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchError {
    #[error("{message}")]
    Validation { message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String, catalog_sample: Vec<String> },

    #[error("Tool '{tool}' is not available for agent '{agent_id}'")]
    PolicyDenied { tool: String, agent_id: String },

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transport error: {message}")]
    Transport { mcp: String, message: String },

    #[error("{message}")]
    UpstreamTool { mcp: String, tool: String, message: String },

    #[error("{message}")]
    SecurityBlocked { message: String, rationale: Option<String> },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("resource exhausted: {message}")]
    ResourceExhausted { message: String },
}

impl OrchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn unknown_tool(name: impl Into<String>, catalog_sample: Vec<String>) -> Self {
        Self::UnknownTool { name: name.into(), catalog_sample }
    }

    pub fn policy_denied(tool: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::PolicyDenied { tool: tool.into(), agent_id: agent_id.into() }
    }

    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    pub fn transport(mcp: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { mcp: mcp.into(), message: message.into() }
    }

    pub fn upstream_tool(mcp: impl Into<String>, tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamTool { mcp: mcp.into(), tool: tool.into(), message: message.into() }
    }

    pub fn security_blocked(message: impl Into<String>, rationale: Option<String>) -> Self {
        Self::SecurityBlocked { message: message.into(), rationale }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted { message: message.into() }
    }

    /// True for errors that indicate the caller's request was blocked by
    /// policy or the Guardian, as opposed to a transport/upstream failure.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::SecurityBlocked { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. })
    }

    /// Short machine-readable kind name, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::UpstreamTool { .. } => "upstream_tool",
            Self::SecurityBlocked { .. } => "security_blocked",
            Self::Configuration { .. } => "configuration",
            Self::ResourceExhausted { .. } => "resource_exhausted",
        }
    }
}

/// Envelope shape shared by every tool response (§6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<bool>,
}

impl From<&OrchError> for ErrorEnvelope {
    fn from(err: &OrchError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            blocked: err.is_blocked().then_some(true),
            denied: err.is_denied().then_some(true),
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::to_string(self).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denied_renders_spec_message() {
        let err = OrchError::policy_denied("B_read", "X");
        assert_eq!(err.to_string(), "Tool 'B_read' is not available for agent 'X'");
    }

    #[test]
    fn envelope_marks_blocked_only_for_security() {
        let err = OrchError::security_blocked("security service unavailable", None);
        let env = ErrorEnvelope::from(&err);
        assert_eq!(env.blocked, Some(true));
        assert_eq!(env.denied, None);
        assert!(!env.success);
    }

    #[test]
    fn envelope_marks_denied_for_policy() {
        let err = OrchError::policy_denied("x", "y");
        let env = ErrorEnvelope::from(&err);
        assert_eq!(env.denied, Some(true));
        assert_eq!(env.blocked, None);
    }

    #[test]
    fn kind_is_stable() {
        assert_eq!(OrchError::timeout(10).kind(), "timeout");
        assert_eq!(OrchError::configuration("x").kind(), "configuration");
    }
}
