//! Subagent Supervisor (C8, §4.8): spawns short-lived, task-scoped agent
//! processes on behalf of an existing agent, waits for their single
//! response under an activity watchdog, and enforces per-parent and global
//! concurrency caps. The "no further recursion" restriction mirrors
//! `openclaw-agent::subagent`'s removal of its own delegate tool from a
//! subagent's toolset — here expressed as `max_concurrent_subagents: 0` on
//! every spawned subagent's definition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{AgentDefinition, CallerMessage, OrchError, OrchestratorConfig, ProcessingResponse};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::AgentManager;
use crate::port;
use crate::runtime::AgentRuntime;
use crate::watchdog::ActivityWatchdog;

/// Idle window before the watchdog considers a subagent stalled (§4.8
/// `[AMBIENT]`): generous enough that a slow tool call doesn't trip it.
const SUBAGENT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SubagentSupervisor {
    manager: Arc<AgentManager>,
    global_semaphore: Arc<Semaphore>,
    timeout_default: Duration,
    timeout_max: Duration,
    mcp_endpoint: String,
    counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
}

impl SubagentSupervisor {
    /// The per-parent cap itself lives on each `AgentDefinition`
    /// (`max_concurrent_subagents`) and is enforced by that agent's own
    /// `AgentRuntime` semaphore (§3 `AgentRuntime` invariant); `config`'s
    /// global knobs are the only ones this supervisor needs directly.
    pub fn new(manager: Arc<AgentManager>, config: &OrchestratorConfig, mcp_endpoint: impl Into<String>) -> Self {
        Self {
            manager,
            global_semaphore: Arc::new(Semaphore::new(config.max_concurrent_subagents_global as usize)),
            timeout_default: Duration::from_secs(config.subagent_timeout_minutes_default * 60),
            timeout_max: Duration::from_secs(config.subagent_timeout_minutes_max * 60),
            mcp_endpoint: mcp_endpoint.into(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// `spawn_subagent(task, timeoutMinutes, allowedToolsHint?)` (§4.8).
    /// `caller_agent_id` is the parent's identity, injected from `_meta`
    /// (§4.9) rather than taken as a tool argument.
    pub async fn spawn_subagent(
        &self,
        caller_agent_id: &str,
        task: &str,
        timeout_minutes: Option<u64>,
        allowed_tools_hint: Option<Vec<String>>,
    ) -> Result<ProcessingResponse, OrchError> {
        let parent = self
            .manager
            .get(caller_agent_id)
            .await
            .ok_or_else(|| OrchError::validation(format!("unknown caller agent '{}'", caller_agent_id)))?;

        // Reserve the per-parent slot before any `.await` below so concurrent
        // callers can't all observe the same pre-increment count and all pass
        // (§5, testable property 7 / scenario S4).
        let parent_permit = match parent.try_acquire_subagent_permit() {
            Ok(permit) => permit,
            Err(()) => {
                return Err(OrchError::resource_exhausted(format!(
                    "agent '{}' already has {} active subagents (limit {})",
                    caller_agent_id,
                    parent.active_subagent_count().await,
                    parent.max_concurrent_subagents()
                )));
            }
        };

        let permit = self
            .global_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| OrchError::resource_exhausted("global subagent concurrency cap reached"))?;

        let timeout = timeout_minutes
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(self.timeout_default)
            .min(self.timeout_max);

        let subagent_id = self.next_subagent_id(caller_agent_id).await;
        let port = port::allocate(None).map_err(|e| OrchError::configuration(e.to_string()))?;

        let effective_allowed = narrow_allowed_tools(parent.allowed_tools(), allowed_tools_hint.as_deref());
        let definition = AgentDefinition {
            agent_id: subagent_id.clone(),
            command: parent_command(&parent),
            args: Vec::new(),
            env: HashMap::new(),
            allowed_tools: effective_allowed,
            denied_tools: parent.denied_tools().to_vec(),
            is_default: false,
            max_concurrent_subagents: 0,
            port_hint: Some(port),
            is_subagent: true,
            parent_agent_id: Some(caller_agent_id.to_string()),
        };

        let runtime = Arc::new(AgentRuntime::new(definition, port, reqwest::Client::new()));

        let cancel = CancellationToken::new();
        let watchdog = ActivityWatchdog::new(SUBAGENT_IDLE_TIMEOUT, timeout, cancel.clone());
        let touch_watchdog = watchdog.clone();
        let on_activity: Arc<dyn Fn() + Send + Sync> = Arc::new(move || touch_watchdog.touch());

        if let Err(e) = runtime
            .spawn_with_activity(&self.mcp_endpoint, Some(task), Some(on_activity))
            .await
        {
            drop(permit);
            drop(parent_permit);
            return Err(OrchError::transport(&subagent_id, e.to_string()));
        }

        parent.register_subagent(subagent_id.clone()).await;
        self.manager.register(runtime.clone()).await;

        let watchdog_handle = watchdog.spawn(&subagent_id);

        let message = CallerMessage {
            id: subagent_id.clone(),
            chat_id: subagent_id.clone(),
            sender_id: caller_agent_id.to_string(),
            text: task.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            channel: "subagent".to_string(),
            agent_id: subagent_id.clone(),
        };

        let result = tokio::select! {
            biased;
            dispatch_result = runtime.dispatch(message) => {
                cancel.cancel();
                dispatch_result
            }
            _ = cancel.cancelled() => {
                Err(OrchError::timeout(timeout.as_millis() as u64))
            }
        };

        watchdog_handle.abort();
        drop(permit);
        drop(parent_permit);
        self.manager.terminate_agent(&subagent_id).await;
        parent.remove_subagent(&subagent_id).await;

        match &result {
            Ok(_) => info!(subagent = %subagent_id, parent = %caller_agent_id, "subagent completed"),
            Err(e) => warn!(subagent = %subagent_id, parent = %caller_agent_id, error = %e, "subagent ended without a result"),
        }

        result
    }

    async fn next_subagent_id(&self, parent: &str) -> String {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(parent.to_string()).or_insert_with(|| Arc::new(AtomicU64::new(0)));
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-sub-{}", parent, n)
    }
}

/// The hint is intersected against the parent's own allow-list when the
/// parent has one; an unrestricted parent (no allow-list) passes the hint
/// through verbatim, and an absent hint passes the parent's list through
/// verbatim (§4.8 "either an explicit hint narrowed against the parent's
/// own permissions, or the parent's permissions verbatim").
fn narrow_allowed_tools(parent_allowed: &[String], hint: Option<&[String]>) -> Vec<String> {
    match hint {
        None => parent_allowed.to_vec(),
        Some(hint) if parent_allowed.is_empty() => hint.to_vec(),
        Some(hint) => hint.iter().filter(|h| parent_allowed.contains(h)).cloned().collect(),
    }
}

fn parent_command(parent: &AgentRuntime) -> String {
    // Subagents run the same binary as their parent; task-specific behavior
    // is selected via `ORCHESTRATOR_BOOTSTRAP_TASK` at spawn time.
    let _ = parent;
    std::env::var("ORCHESTRATOR_AGENT_COMMAND").unwrap_or_else(|_| "agent".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_intersects_with_parent_allowlist() {
        let parent = vec!["mail_read".to_string(), "mail_write".to_string()];
        let hint = vec!["mail_write".to_string(), "vault_delete".to_string()];
        let effective = narrow_allowed_tools(&parent, Some(&hint));
        assert_eq!(effective, vec!["mail_write".to_string()]);
    }

    #[test]
    fn no_hint_passes_parent_list_verbatim() {
        let parent = vec!["mail_read".to_string()];
        assert_eq!(narrow_allowed_tools(&parent, None), parent);
    }

    #[test]
    fn unrestricted_parent_passes_hint_verbatim() {
        let hint = vec!["anything".to_string()];
        assert_eq!(narrow_allowed_tools(&[], Some(&hint)), hint);
    }

    #[tokio::test]
    async fn spawn_subagent_rejects_unknown_caller() {
        let manager = Arc::new(AgentManager::new("stdio://orchestrator"));
        let config = OrchestratorConfig::default();
        let supervisor = SubagentSupervisor::new(manager, &config, "stdio://orchestrator");
        let err = supervisor
            .spawn_subagent("ghost", "do something", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchError::Validation { .. }));
    }

    #[tokio::test]
    async fn spawn_subagent_rejects_over_per_parent_cap() {
        let manager = Arc::new(AgentManager::new("stdio://orchestrator"));
        let config = OrchestratorConfig::default();
        let mut definition = default_definition("parent");
        definition.max_concurrent_subagents = 0;
        manager.start_one(definition).await.unwrap();
        let supervisor = SubagentSupervisor::new(manager, &config, "stdio://orchestrator");
        let err = supervisor.spawn_subagent("parent", "task", None, None).await.unwrap_err();
        assert!(matches!(err, OrchError::ResourceExhausted { .. }));
    }

    /// Regression test for the check-then-register race (§5, testable
    /// property 7 / scenario S4): with a cap of 2, three concurrent
    /// `spawn_subagent` calls from the same parent must leave exactly one
    /// rejected as resource-exhausted, never all three (or zero) passing the
    /// check. The per-parent semaphore permit is reserved synchronously
    /// before any `.await`, so the outcome is deterministic regardless of
    /// how the three futures happen to interleave.
    #[tokio::test]
    async fn spawn_subagent_cap_is_atomic_under_concurrent_load() {
        let manager = Arc::new(AgentManager::new("stdio://orchestrator"));
        let config = OrchestratorConfig::default();
        let mut definition = default_definition("parent");
        definition.max_concurrent_subagents = 2;
        manager.start_one(definition).await.unwrap();
        let supervisor = Arc::new(SubagentSupervisor::new(manager, &config, "stdio://orchestrator"));

        let (a, b, c) = tokio::join!(
            supervisor.spawn_subagent("parent", "task-a", None, None),
            supervisor.spawn_subagent("parent", "task-b", None, None),
            supervisor.spawn_subagent("parent", "task-c", None, None),
        );

        let exhausted = [&a, &b, &c]
            .into_iter()
            .filter(|r| matches!(r, Err(OrchError::ResourceExhausted { .. })))
            .count();
        assert_eq!(exhausted, 1, "exactly one of three concurrent spawns over a cap of 2 must be rejected");
    }

    fn default_definition(agent_id: &str) -> AgentDefinition {
        AgentDefinition {
            agent_id: agent_id.to_string(),
            command: "cat".to_string(),
            args: vec![],
            env: HashMap::new(),
            allowed_tools: vec![],
            denied_tools: vec![],
            is_default: false,
            max_concurrent_subagents: 0,
            port_hint: None,
            is_subagent: false,
            parent_agent_id: None,
        }
    }
}
