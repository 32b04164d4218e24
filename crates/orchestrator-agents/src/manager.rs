//! Agent Manager (C7): owns the `agentId -> AgentRuntime` map, starts each
//! configured top-level agent, and dispatches resolved channel messages to
//! the right one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{AgentDefinition, CallerMessage, OrchError, OrchestratorConfig, ProcessingResponse};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::port;
use crate::runtime::{AgentRuntime, AgentStatus};

pub struct AgentManager {
    agents: RwLock<HashMap<String, Arc<AgentRuntime>>>,
    default_agent_id: RwLock<Option<String>>,
    mcp_endpoint: String,
    http_client: reqwest::Client,
}

impl AgentManager {
    pub fn new(mcp_endpoint: impl Into<String>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            default_agent_id: RwLock::new(None),
            mcp_endpoint: mcp_endpoint.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("static reqwest client config"),
        }
    }

    /// Startup step 7 (§4.10): spawn every configured, non-subagent agent.
    pub async fn start_all(&self, config: &OrchestratorConfig) -> anyhow::Result<()> {
        for definition in config.agents.iter().filter(|a| !a.is_subagent) {
            self.start_one(definition.clone()).await?;
            if definition.is_default {
                *self.default_agent_id.write().await = Some(definition.agent_id.clone());
            }
        }
        Ok(())
    }

    pub async fn start_one(&self, definition: AgentDefinition) -> anyhow::Result<Arc<AgentRuntime>> {
        let port = port::allocate(definition.port_hint)?;
        let runtime = Arc::new(AgentRuntime::new(definition, port, self.http_client.clone()));
        runtime.spawn(&self.mcp_endpoint, None).await?;
        self.agents.write().await.insert(runtime.agent_id.clone(), runtime.clone());
        Ok(runtime)
    }

    /// Registers an already-spawned runtime (used by the subagent
    /// supervisor, which owns the spawn sequencing itself).
    pub async fn register(&self, runtime: Arc<AgentRuntime>) {
        self.agents.write().await.insert(runtime.agent_id.clone(), runtime);
    }

    pub async fn unregister(&self, agent_id: &str) {
        self.agents.write().await.remove(agent_id);
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn default_agent_id(&self) -> Option<String> {
        self.default_agent_id.read().await.clone()
    }

    /// Resolves `agentId` (falling back to the default agent when unset)
    /// and pushes the message (§4.7).
    pub async fn on_message(&self, message: CallerMessage) -> Result<ProcessingResponse, OrchError> {
        let agent_id = message.agent_id.clone();
        let runtime = match self.get(&agent_id).await {
            Some(r) => r,
            None => {
                warn!(agent_id, "channel message addressed to unknown agent, dropping");
                return Err(OrchError::validation(format!("unknown agent '{}'", agent_id)));
            }
        };
        runtime.dispatch(message).await
    }

    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let mut out = Vec::new();
        for runtime in self.agents.read().await.values() {
            out.push(runtime.status().await);
        }
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        out
    }

    /// Terminates one agent and cascade-kills every subagent still recorded
    /// under it (§4.8 "Cascade kill"). Idempotent: terminating an agent that
    /// isn't registered is a no-op.
    pub async fn terminate_agent(&self, agent_id: &str) {
        let runtime = self.agents.write().await.remove(agent_id);
        let Some(runtime) = runtime else { return };
        let orphaned = runtime.terminate().await;
        for subagent_id in orphaned {
            Box::pin(self.terminate_agent(&subagent_id)).await;
        }
    }

    /// Shutdown step (§4.10): terminate every registered agent, cascading
    /// into subagents as it goes.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        for id in ids {
            self.terminate_agent(&id).await;
        }
        info!("agent manager shut down");
    }
}
