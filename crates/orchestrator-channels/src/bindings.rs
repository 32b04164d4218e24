//! `(channel, chatId) -> agentId` lookup (§3 `ChannelBinding`). Exact match
//! only; no binding falls back to the configured default agent.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ChannelBindings {
    map: HashMap<(String, String), String>,
    default_agent_id: String,
}

impl ChannelBindings {
    pub fn new(default_agent_id: impl Into<String>) -> Self {
        Self {
            map: HashMap::new(),
            default_agent_id: default_agent_id.into(),
        }
    }

    pub fn bind(&mut self, channel: impl Into<String>, chat_id: impl Into<String>, agent_id: impl Into<String>) {
        self.map.insert((channel.into(), chat_id.into()), agent_id.into());
    }

    pub fn resolve(&self, channel: &str, chat_id: &str) -> &str {
        self.map
            .get(&(channel.to_string(), chat_id.to_string()))
            .map(String::as_str)
            .unwrap_or(&self.default_agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_chat_falls_back_to_default() {
        let bindings = ChannelBindings::new("default-agent");
        assert_eq!(bindings.resolve("telegram", "123"), "default-agent");
    }

    #[test]
    fn bound_chat_resolves_exactly() {
        let mut bindings = ChannelBindings::new("default-agent");
        bindings.bind("telegram", "123", "support-agent");
        assert_eq!(bindings.resolve("telegram", "123"), "support-agent");
        assert_eq!(bindings.resolve("telegram", "999"), "default-agent");
        assert_eq!(bindings.resolve("discord", "123"), "default-agent");
    }
}
