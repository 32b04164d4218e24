//! `AgentRuntime` (§3): one long-lived or short-lived agent process. Spawn
//! and teardown follow `McpClient`'s shape (`tokio::process::Command` with
//! piped stdio, `kill_on_drop`), but the wire protocol to an agent is a
//! plain HTTP POST (§6 "Channel message payload") rather than JSON-RPC —
//! the agent is someone else's process, not an MCP child we frame.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_core::{AgentDefinition, CallerMessage, OrchError, ProcessingResponse};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{info, warn};

/// Grace period between SIGTERM and SIGKILL (§4.10, §4.8 "cascade kill").
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Starting,
    Ready,
    Busy,
    Paused,
    Exited,
}

/// `get_status` shape (§4.7).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: String,
    pub available: bool,
    pub state: AgentState,
    pub is_subagent: bool,
    pub parent_agent_id: Option<String>,
    pub port: u16,
}

pub struct AgentRuntime {
    pub agent_id: String,
    pub is_subagent: bool,
    pub parent_agent_id: Option<String>,
    pub port: u16,
    definition: AgentDefinition,
    state: Arc<RwLock<AgentState>>,
    process: Arc<Mutex<Option<Child>>>,
    active_subagents: Arc<Mutex<HashSet<String>>>,
    /// One permit per `max_concurrent_subagents` slot. Reserving a permit
    /// before any `.await` point is what makes the per-parent cap atomic
    /// against concurrent `spawn_subagent` calls (§5 "Shared-resource
    /// policy", testable property 7 / scenario S4) — mirrors the global cap's
    /// `Semaphore::try_acquire_owned` discipline.
    subagent_slots: Arc<Semaphore>,
    http_client: reqwest::Client,
}

impl AgentRuntime {
    pub fn new(definition: AgentDefinition, port: u16, http_client: reqwest::Client) -> Self {
        let subagent_slots = Arc::new(Semaphore::new(definition.max_concurrent_subagents as usize));
        Self {
            agent_id: definition.agent_id.clone(),
            is_subagent: definition.is_subagent,
            parent_agent_id: definition.parent_agent_id.clone(),
            port,
            definition,
            state: Arc::new(RwLock::new(AgentState::Starting)),
            process: Arc::new(Mutex::new(None)),
            active_subagents: Arc::new(Mutex::new(HashSet::new())),
            subagent_slots,
            http_client,
        }
    }

    /// Spawns the agent process, supplying it the Orchestrator's own MCP
    /// endpoint and its agentId so it can place both in outgoing `_meta`
    /// (§4.7). `bootstrap_task` is set only for subagents (§4.8: "pass the
    /// task as its bootstrap input").
    pub async fn spawn(&self, mcp_endpoint: &str, bootstrap_task: Option<&str>) -> Result<()> {
        self.spawn_with_activity(mcp_endpoint, bootstrap_task, None).await
    }

    /// Like [`Self::spawn`], but `on_activity` is invoked for every line the
    /// child emits on stdout/stderr — the subagent supervisor's watchdog
    /// (§4.8 `[AMBIENT]`) touches on these as a sign of progress.
    pub async fn spawn_with_activity(
        &self,
        mcp_endpoint: &str,
        bootstrap_task: Option<&str>,
        on_activity: Option<Arc<dyn Fn() + Send + Sync>>,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.definition.command);
        cmd.args(&self.definition.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.definition.env {
            cmd.env(k, v);
        }
        cmd.env("ORCHESTRATOR_AGENT_ID", &self.agent_id);
        cmd.env("ORCHESTRATOR_AGENT_PORT", self.port.to_string());
        cmd.env("ORCHESTRATOR_MCP_ENDPOINT", mcp_endpoint);
        if let Some(task) = bootstrap_task {
            cmd.env("ORCHESTRATOR_BOOTSTRAP_TASK", task);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn agent '{}': {}", self.agent_id, self.definition.command))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump(self.agent_id.clone(), stdout, false, on_activity.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump(self.agent_id.clone(), stderr, true, on_activity);
        }

        *self.process.lock().await = Some(child);
        *self.state.write().await = AgentState::Ready;
        info!(agent = %self.agent_id, port = self.port, "agent started");
        Ok(())
    }

    pub async fn state(&self) -> AgentState {
        *self.state.read().await
    }

    pub async fn is_available(&self) -> bool {
        matches!(*self.state.read().await, AgentState::Ready)
    }

    pub async fn status(&self) -> AgentStatus {
        AgentStatus {
            agent_id: self.agent_id.clone(),
            available: self.is_available().await,
            state: self.state().await,
            is_subagent: self.is_subagent,
            parent_agent_id: self.parent_agent_id.clone(),
            port: self.port,
        }
    }

    pub fn max_concurrent_subagents(&self) -> u32 {
        self.definition.max_concurrent_subagents
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.definition.allowed_tools
    }

    pub fn denied_tools(&self) -> &[String] {
        &self.definition.denied_tools
    }

    pub async fn active_subagent_count(&self) -> usize {
        self.active_subagents.lock().await.len()
    }

    /// Reserves one of this agent's `max_concurrent_subagents` slots without
    /// suspending. Fails immediately if none are free; the permit must be
    /// held for the subagent's whole lifetime and dropped when it is reaped.
    pub fn try_acquire_subagent_permit(&self) -> Result<OwnedSemaphorePermit, ()> {
        self.subagent_slots.clone().try_acquire_owned().map_err(|_| ())
    }

    pub async fn register_subagent(&self, subagent_id: impl Into<String>) {
        self.active_subagents.lock().await.insert(subagent_id.into());
    }

    pub async fn remove_subagent(&self, subagent_id: &str) {
        self.active_subagents.lock().await.remove(subagent_id);
    }

    pub async fn subagent_ids(&self) -> Vec<String> {
        self.active_subagents.lock().await.iter().cloned().collect()
    }

    /// Pushes a channel message to `/process-message` (§4.7, §6). Marks the
    /// runtime `Busy` for the duration of the call.
    pub async fn dispatch(&self, message: CallerMessage) -> Result<ProcessingResponse, OrchError> {
        if !self.is_available().await {
            return Err(OrchError::transport(&self.agent_id, "agent is not ready"));
        }
        *self.state.write().await = AgentState::Busy;

        let url = format!("http://127.0.0.1:{}/process-message", self.port);
        let outcome = self
            .http_client
            .post(&url)
            .json(&message)
            .send()
            .await
            .map_err(|e| OrchError::transport(&self.agent_id, e.to_string()));

        let result = match outcome {
            Ok(resp) => resp
                .json::<ProcessingResponse>()
                .await
                .map_err(|e| OrchError::transport(&self.agent_id, format!("malformed response: {}", e))),
            Err(e) => Err(e),
        };

        if matches!(*self.state.read().await, AgentState::Busy) {
            *self.state.write().await = AgentState::Ready;
        }
        result
    }

    /// SIGTERM, then SIGKILL after [`TERMINATE_GRACE`] if the child is still
    /// alive (§4.8, §4.10). Returns the subagent ids this runtime still had
    /// registered, so the caller can cascade-kill them.
    pub async fn terminate(&self) -> Vec<String> {
        *self.state.write().await = AgentState::Exited;
        let subagents = self.subagent_ids().await;

        if let Some(mut child) = self.process.lock().await.take() {
            terminate_child(&mut child, self.agent_id.as_str()).await;
        }
        subagents
    }
}

async fn terminate_child(child: &mut Child, label: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(agent = label, error = ?e, "failed to send SIGTERM, falling back to SIGKILL");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!(agent = label, "grace period elapsed, sending SIGKILL");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

fn spawn_line_pump<R>(agent_id: String, reader: R, is_stderr: bool, on_activity: Option<Arc<dyn Fn() + Send + Sync>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(touch) = &on_activity {
                touch();
            }
            if is_stderr {
                warn!(agent = %agent_id, "{}", line);
            } else {
                info!(agent = %agent_id, "{}", line);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn definition(agent_id: &str) -> AgentDefinition {
        AgentDefinition {
            agent_id: agent_id.to_string(),
            command: "cat".to_string(),
            args: vec![],
            env: HashMap::new(),
            allowed_tools: vec![],
            denied_tools: vec![],
            is_default: false,
            max_concurrent_subagents: 2,
            port_hint: None,
            is_subagent: false,
            parent_agent_id: None,
        }
    }

    #[tokio::test]
    async fn starts_unready_and_becomes_ready_after_spawn() {
        let runtime = AgentRuntime::new(definition("a1"), 7801, reqwest::Client::new());
        assert_eq!(runtime.state().await, AgentState::Starting);
        runtime.spawn("http://127.0.0.1:7800", None).await.unwrap();
        assert_eq!(runtime.state().await, AgentState::Ready);
        assert!(runtime.is_available().await);
        runtime.terminate().await;
        assert_eq!(runtime.state().await, AgentState::Exited);
    }

    #[tokio::test]
    async fn subagent_registry_tracks_membership() {
        let runtime = AgentRuntime::new(definition("a1"), 7801, reqwest::Client::new());
        runtime.register_subagent("a1-sub-1").await;
        assert_eq!(runtime.active_subagent_count().await, 1);
        runtime.remove_subagent("a1-sub-1").await;
        assert_eq!(runtime.active_subagent_count().await, 0);
    }

    #[tokio::test]
    async fn dispatch_against_unready_runtime_is_a_transport_error() {
        let runtime = AgentRuntime::new(definition("a1"), 7801, reqwest::Client::new());
        let message = CallerMessage {
            id: "1".into(),
            chat_id: "c".into(),
            sender_id: "s".into(),
            text: "hi".into(),
            date: "2026-01-01T00:00:00Z".into(),
            channel: "telegram".into(),
            agent_id: "a1".into(),
        };
        let err = runtime.dispatch(message).await.unwrap_err();
        assert!(matches!(err, OrchError::Transport { .. }));
    }
}
