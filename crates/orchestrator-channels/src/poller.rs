//! Channel Poller (C6): for each channel-role MCP, pulls recent messages on
//! an interval and dispatches new ones to the Agent Manager. Grounded in
//! `openclaw_gateway::main`'s Telegram long-polling loop (`tokio::select!`
//! racing an update fetch against a shutdown signal, semaphore-style
//! concurrency discipline) and `openclaw_gateway::telegram::TelegramBot`'s
//! response shapes, generalized from one hard-coded provider to any MCP
//! that declares `role=channel`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use orchestrator_core::{CallerMessage, ChannelConfig};
use orchestrator_mcp::{CallOutcome, McpClient};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bindings::ChannelBindings;
use crate::lru::ProcessedLru;

#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub date: DateTime<Utc>,
    pub channel: String,
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    id: i64,
    chat_id: String,
    #[serde(default)]
    sender_id: String,
    #[serde(default)]
    text: String,
    /// Unix seconds, the common wire shape among messaging MCPs in this pack.
    date: i64,
}

#[derive(Debug, Default, Deserialize)]
struct GetMessagesResult {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ListChatsResult {
    #[serde(default)]
    chats: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GetMeResult {
    #[serde(default)]
    id: String,
}

struct ChannelState {
    mcp_name: String,
    client: McpClient,
    channel_config: ChannelConfig,
    bot_id: Mutex<Option<String>>,
    monitored_chats: Mutex<Vec<String>>,
    last_refresh: Mutex<Option<Instant>>,
    processed: Mutex<ProcessedLru>,
}

/// Polls every registered channel MCP on a single timer, dispatching
/// surviving messages to `on_message`.
pub struct ChannelPoller<F> {
    channels: Vec<Arc<ChannelState>>,
    bindings: ChannelBindings,
    poll_interval: Duration,
    refresh_interval: Duration,
    max_message_age: Duration,
    max_per_cycle: usize,
    in_flight: Arc<AtomicBool>,
    on_message: Arc<F>,
}

impl<F, Fut> ChannelPoller<F>
where
    F: Fn(ChannelMessage) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bindings: ChannelBindings,
        poll_interval: Duration,
        refresh_interval: Duration,
        max_message_age: Duration,
        max_per_cycle: usize,
        on_message: F,
    ) -> Self {
        Self {
            channels: Vec::new(),
            bindings,
            poll_interval,
            refresh_interval,
            max_message_age,
            max_per_cycle,
            in_flight: Arc::new(AtomicBool::new(false)),
            on_message: Arc::new(on_message),
        }
    }

    pub fn register(&mut self, mcp_name: impl Into<String>, client: McpClient, channel_config: ChannelConfig) {
        self.channels.push(Arc::new(ChannelState {
            mcp_name: mcp_name.into(),
            client,
            channel_config,
            bot_id: Mutex::new(None),
            monitored_chats: Mutex::new(Vec::new()),
            last_refresh: Mutex::new(None),
            processed: Mutex::new(ProcessedLru::new()),
        }));
    }

    /// Drive the poll loop until `shutdown` resolves.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("channel poller shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if self.in_flight.swap(true, Ordering::SeqCst) {
                        // Previous cycle still running; skip this tick (§5).
                        continue;
                    }
                    self.run_cycle().await;
                    self.in_flight.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    async fn run_cycle(&self) {
        for channel in &self.channels {
            if let Err(e) = self.poll_channel(channel).await {
                warn!(mcp = %channel.mcp_name, error = %e, "channel poll cycle failed");
            }
        }
    }

    async fn poll_channel(&self, channel: &Arc<ChannelState>) -> anyhow::Result<()> {
        self.maybe_refresh(channel).await?;

        let bot_id = channel.bot_id.lock().await.clone();
        let chats = channel.monitored_chats.lock().await.clone();

        for chat_id in chats {
            let raw = self.fetch_messages(channel, &chat_id).await?;
            let mut surviving: Vec<RawMessage> = raw
                .into_iter()
                .filter(|m| bot_id.as_deref() != Some(m.sender_id.as_str()))
                .filter(|m| !is_self_echo(&m.text, &channel.channel_config.bot_patterns))
                .filter(|m| self.within_max_age(m.date))
                .collect();
            surviving.sort_by_key(|m| m.id);

            let mut processed = channel.processed.lock().await;
            let mut dispatched = 0usize;
            for raw_message in surviving {
                if dispatched >= self.max_per_cycle {
                    break;
                }
                let id = raw_message.id.to_string();
                if !processed.mark_if_new(&id) {
                    continue;
                }
                dispatched += 1;
                let agent_id = self.bindings.resolve(&channel.mcp_name, &chat_id).to_string();
                let message = ChannelMessage {
                    id,
                    chat_id: raw_message.chat_id,
                    sender_id: raw_message.sender_id,
                    text: raw_message.text,
                    date: DateTime::from_timestamp(raw_message.date, 0).unwrap_or_else(Utc::now),
                    channel: channel.mcp_name.clone(),
                    agent_id,
                };
                let on_message = self.on_message.clone();
                (on_message)(message).await;
            }
        }
        Ok(())
    }

    fn within_max_age(&self, epoch_s: i64) -> bool {
        let Some(sent) = DateTime::from_timestamp(epoch_s, 0) else {
            return true;
        };
        let age = Utc::now().signed_duration_since(sent);
        age.to_std().map(|d| d <= self.max_message_age).unwrap_or(true)
    }

    async fn maybe_refresh(&self, channel: &Arc<ChannelState>) -> anyhow::Result<()> {
        let needs_refresh = {
            let last = channel.last_refresh.lock().await;
            match *last {
                None => true,
                Some(t) => t.elapsed() >= self.refresh_interval,
            }
        };
        if !needs_refresh {
            return Ok(());
        }

        if channel.bot_id.lock().await.is_none() {
            if let Ok(me) = self.call::<GetMeResult>(channel, "get_me", serde_json::json!({})).await {
                *channel.bot_id.lock().await = Some(me.id);
            }
        }

        let chats = self.call::<ListChatsResult>(channel, "list_chats", serde_json::json!({})).await?;
        *channel.monitored_chats.lock().await = chats.chats;
        *channel.last_refresh.lock().await = Some(Instant::now());
        Ok(())
    }

    async fn fetch_messages(&self, channel: &Arc<ChannelState>, chat_id: &str) -> anyhow::Result<Vec<RawMessage>> {
        let result = self
            .call::<GetMessagesResult>(channel, "get_messages", serde_json::json!({"chatId": chat_id}))
            .await?;
        Ok(result.messages)
    }

    async fn call<T: Default + serde::de::DeserializeOwned>(
        &self,
        channel: &Arc<ChannelState>,
        tool: &str,
        args: serde_json::Value,
    ) -> anyhow::Result<T> {
        match channel.client.call_tool(tool, args).await {
            CallOutcome::Ok(result) => Ok(result
                .text()
                .and_then(|t| serde_json::from_str(t).ok())
                .unwrap_or_default()),
            CallOutcome::Err(e) => Err(anyhow::anyhow!("{}", e)),
        }
    }
}

fn is_self_echo(text: &str, bot_patterns: &[String]) -> bool {
    bot_patterns.iter().any(|p| text.starts_with(p.as_str()))
}

/// Built from a dispatched [`ChannelMessage`] for delivery to the Agent
/// Manager's `/process-message` payload (§6).
impl From<ChannelMessage> for CallerMessage {
    fn from(m: ChannelMessage) -> Self {
        CallerMessage {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            text: m.text,
            date: m.date.to_rfc3339(),
            channel: m.channel,
            agent_id: m.agent_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_echo_patterns_match_prefix() {
        let patterns = vec!["/bot ".to_string()];
        assert!(is_self_echo("/bot hello", &patterns));
        assert!(!is_self_echo("hello /bot", &patterns));
    }

    #[test]
    fn no_patterns_never_matches() {
        assert!(!is_self_echo("anything", &[]));
    }
}
