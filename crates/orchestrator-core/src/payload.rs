//! Wire payloads shared between the Channel Poller, the Agent Manager, and
//! the agent processes themselves (§6 "Channel message payload").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    /// ISO-8601.
    pub date: String,
    pub channel: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_message_round_trips_camel_case() {
        let msg = CallerMessage {
            id: "1".into(),
            chat_id: "123".into(),
            sender_id: "42".into(),
            text: "hi".into(),
            date: "2026-01-01T00:00:00Z".into(),
            channel: "telegram".into(),
            agent_id: "default".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"chatId\""));
        assert!(json.contains("\"agentId\""));
    }

    #[test]
    fn processing_response_defaults() {
        let resp: ProcessingResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(resp.success);
        assert!(resp.tools_used.is_empty());
        assert_eq!(resp.total_steps, 0);
    }
}
