//! The stdio MCP client (C1): one instance per `McpDescriptor`, framing
//! JSON-RPC over a spawned child's stdin/stdout and piping its stderr into
//! the parent log. Generalizes `openclaw-mcp::transport::stdio` (which only
//! ever ran the *server* side of this same line-delimited protocol) to the
//! *client* side, parameterized by descriptor instead of hard-coded per MCP.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use orchestrator_core::{Entrypoint, McpDescriptor, OrchError};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, ToolCallResult, ToolDefinition, ToolsListResult,
};

/// `MCPClient` state machine (SPEC_FULL.md §3/§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Unstarted,
    Starting,
    Available,
    Degraded,
    Closed,
}

/// Outcome of a single `call_tool`: either a tool result or a classified error.
pub enum CallOutcome {
    Ok(ToolCallResult),
    Err(OrchError),
}

const MAX_RESTART_ATTEMPTS_PER_WINDOW: u32 = 5;
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const RESTART_BACKOFF_BASE: Duration = Duration::from_millis(250);

struct Pending {
    waiters: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

/// One stdio MCP client. Cheaply cloneable; all mutable state lives behind
/// the contained `Arc`s, so a `Clone` shares the same underlying child.
#[derive(Clone)]
pub struct McpClient {
    pub name: String,
    descriptor: Arc<McpDescriptor>,
    state: Arc<RwLock<ClientState>>,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: Arc<Pending>,
    next_id: Arc<AtomicU64>,
    tool_cache: Arc<RwLock<Vec<ToolDefinition>>>,
    restart_attempts: Arc<Mutex<Vec<std::time::Instant>>>,
}

impl McpClient {
    pub fn new(descriptor: McpDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            descriptor: Arc::new(descriptor),
            state: Arc::new(RwLock::new(ClientState::Unstarted)),
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            pending: Arc::new(Pending {
                waiters: Mutex::new(HashMap::new()),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
            tool_cache: Arc::new(RwLock::new(Vec::new())),
            restart_attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn descriptor(&self) -> &McpDescriptor {
        &self.descriptor
    }

    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    pub async fn is_available(&self) -> bool {
        matches!(*self.state.read().await, ClientState::Available)
    }

    /// Spawn the child and complete the MCP handshake (§4.1).
    pub async fn initialize(&self) -> Result<()> {
        *self.state.write().await = ClientState::Starting;

        let (command, argv, cwd, env_overrides) = match &self.descriptor.entrypoint {
            Entrypoint::Stdio {
                command,
                argv,
                working_directory,
                env_overrides,
            } => (command.clone(), argv.clone(), working_directory.clone(), env_overrides.clone()),
            Entrypoint::Http { .. } => {
                *self.state.write().await = ClientState::Closed;
                return Err(anyhow!(
                    "mcp '{}' has an http entrypoint; McpClient only drives stdio children",
                    self.name
                ));
            }
        };

        let mut cmd = tokio::process::Command::new(&command);
        cmd.args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        // The child always speaks stdio to us regardless of what transport
        // env vars it might otherwise pick up from the parent environment.
        cmd.env_remove("MCP_TRANSPORT");
        cmd.env_remove("MCP_HTTP_PORT");
        for (k, v) in &env_overrides {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn mcp '{}': {}", self.name, command))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        *self.stdin.lock().await = Some(stdin);

        self.spawn_stderr_pump(stderr);
        self.spawn_reader(stdout);

        *self.child.lock().await = Some(child);

        match self.handshake().await {
            Ok(()) => {
                *self.state.write().await = ClientState::Available;
                info!(mcp = %self.name, "mcp available");
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = ClientState::Closed;
                if self.descriptor.required {
                    Err(e).with_context(|| format!("required mcp '{}' failed to start", self.name))
                } else {
                    warn!(mcp = %self.name, error = %e, "mcp handshake failed, leaving unavailable");
                    Ok(())
                }
            }
        }
    }

    async fn handshake(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "orchestrator", "version": env!("CARGO_PKG_VERSION")},
        });
        let result = self
            .send_request("initialize", Some(params), self.descriptor.timeout_ms)
            .await?;
        if let Some(err) = result.error {
            return Err(anyhow!("initialize error: {}", err.message));
        }
        self.send_notification("notifications/initialized", None).await?;
        Ok(())
    }

    fn spawn_stderr_pump(&self, stderr: tokio::process::ChildStderr) {
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(mcp = %name, "{}", line);
            }
        });
    }

    fn spawn_reader(&self, stdout: tokio::process::ChildStdout) {
        let pending = self.pending.clone();
        let state = self.state.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(line) {
                            Ok(resp) => {
                                if let Some(id) = resp.id.as_ref().and_then(Value::as_u64) {
                                    let mut waiters = pending.waiters.lock().await;
                                    if let Some(tx) = waiters.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(mcp = %name, error = %e, "malformed frame from child");
                            }
                        }
                    }
                    Ok(None) => {
                        info!(mcp = %name, "child stdout closed");
                        break;
                    }
                    Err(e) => {
                        warn!(mcp = %name, error = %e, "error reading child stdout");
                        break;
                    }
                }
            }
            // Transport is gone: degrade and fail every outstanding waiter.
            *state.write().await = ClientState::Degraded;
            let mut waiters = pending.waiters.lock().await;
            for (_, tx) in waiters.drain() {
                let _ = tx.send(JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    id: None,
                    result: None,
                    error: Some(crate::protocol::JsonRpcError {
                        code: crate::protocol::INTERNAL_ERROR,
                        message: "transport closed".to_string(),
                        data: None,
                    }),
                });
            }
        });
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let mut line = serde_json::to_string(&payload)?;
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| anyhow!("mcp '{}' not connected", self.name))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout_ms: u64,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(json!(id), method, params);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.pending.waiters.lock().await;
            waiters.insert(id, tx);
        }

        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard.as_mut().ok_or_else(|| anyhow!("mcp '{}' not connected", self.name))?;
            if let Err(e) = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await
            {
                self.pending.waiters.lock().await.remove(&id);
                return Err(anyhow!("write to mcp '{}' failed: {}", self.name, e));
            }
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(anyhow!("mcp '{}' dropped the request", self.name)),
            Err(_) => {
                self.pending.waiters.lock().await.remove(&id);
                Err(anyhow!("timed out after {}ms", timeout_ms))
            }
        }
    }

    /// `listTools()` — empty when unavailable, per §4.1.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        if !self.is_available().await {
            return Vec::new();
        }
        match self.send_request("tools/list", None, self.descriptor.timeout_ms).await {
            Ok(resp) => match resp.result {
                Some(value) => {
                    let parsed: ToolsListResult = serde_json::from_value(value).unwrap_or_default();
                    *self.tool_cache.write().await = parsed.tools.clone();
                    parsed.tools
                }
                None => Vec::new(),
            },
            Err(e) => {
                warn!(mcp = %self.name, error = %e, "list_tools failed");
                Vec::new()
            }
        }
    }

    /// Last tool list observed by a successful `list_tools` call.
    pub async fn cached_tools(&self) -> Vec<ToolDefinition> {
        self.tool_cache.read().await.clone()
    }

    /// `callTool(name, args)` (§4.1). Classifies transport failures as
    /// `Degraded` per the fatal-error rule and returns a user-visible,
    /// auto-restart-will-happen message in that case.
    pub async fn call_tool(&self, tool: &str, args: Value) -> CallOutcome {
        if !self.is_available().await {
            return CallOutcome::Err(OrchError::transport(
                &self.name,
                "service may be temporarily unavailable — will auto-restart shortly",
            ));
        }

        let params = json!({"name": tool, "arguments": args});
        match self.send_request("tools/call", Some(params), self.descriptor.timeout_ms).await {
            Ok(resp) => {
                if let Some(err) = resp.error {
                    return CallOutcome::Err(OrchError::upstream_tool(&self.name, tool, err.message));
                }
                let result: ToolCallResult = resp
                    .result
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                CallOutcome::Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                if is_fatal_transport_error(&message) {
                    *self.state.write().await = ClientState::Degraded;
                    CallOutcome::Err(OrchError::transport(
                        &self.name,
                        "service may be temporarily unavailable — will auto-restart shortly",
                    ))
                } else if message.starts_with("timed out") {
                    CallOutcome::Err(OrchError::timeout(self.descriptor.timeout_ms))
                } else {
                    CallOutcome::Err(OrchError::transport(&self.name, message))
                }
            }
        }
    }

    /// Lightweight health predicate used by the supervisor restart loop.
    pub async fn health_check(&self) -> bool {
        if !self.is_available().await {
            return false;
        }
        self.send_request("tools/list", None, self.descriptor.timeout_ms).await.is_ok()
    }

    pub async fn close(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        }
        *self.stdin.lock().await = None;
        *self.state.write().await = ClientState::Closed;
        let mut waiters = self.pending.waiters.lock().await;
        waiters.clear();
    }

    /// close-then-initialize with a short backoff and a bounded attempt
    /// count per rolling window (§4.1).
    pub async fn restart(&self) -> Result<()> {
        {
            let mut attempts = self.restart_attempts.lock().await;
            let now = std::time::Instant::now();
            attempts.retain(|t| now.duration_since(*t) < RESTART_WINDOW);
            if attempts.len() as u32 >= MAX_RESTART_ATTEMPTS_PER_WINDOW {
                return Err(anyhow!(
                    "mcp '{}' exceeded {} restart attempts in {:?}",
                    self.name,
                    MAX_RESTART_ATTEMPTS_PER_WINDOW,
                    RESTART_WINDOW
                ));
            }
            let backoff = RESTART_BACKOFF_BASE * (attempts.len() as u32 + 1);
            attempts.push(now);
            drop(attempts);
            tokio::time::sleep(backoff).await;
        }
        self.close().await;
        self.initialize().await
    }
}

/// Errors whose message indicates the pipe is gone, as opposed to a
/// protocol-level or timeout error (§4.1, §7 `TransportError`).
fn is_fatal_transport_error(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("broken pipe")
        || m.contains("not connected")
        || m.contains("dropped the request")
        || m.contains("failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::{McpRole, Origin};
    use std::collections::HashMap as Map;

    fn descriptor(command: &str, argv: Vec<&str>) -> McpDescriptor {
        McpDescriptor {
            name: "echo".to_string(),
            origin: Origin::Internal,
            entrypoint: Entrypoint::Stdio {
                command: command.to_string(),
                argv: argv.into_iter().map(String::from).collect(),
                working_directory: None,
                env_overrides: Map::new(),
            },
            timeout_ms: 2000,
            required: false,
            sensitive: false,
            role: McpRole::Default,
            channel_config: None,
            allow_destructive_tools: false,
            guardian_input: false,
            guardian_output: false,
        }
    }

    #[tokio::test]
    async fn unstarted_client_reports_no_tools() {
        let client = McpClient::new(descriptor("cat", vec![]));
        assert_eq!(client.state().await, ClientState::Unstarted);
        assert!(client.list_tools().await.is_empty());
    }

    #[tokio::test]
    async fn call_tool_on_unavailable_client_is_transport_error() {
        let client = McpClient::new(descriptor("cat", vec![]));
        match client.call_tool("anything", json!({})).await {
            CallOutcome::Err(OrchError::Transport { .. }) => {}
            _ => panic!("expected a transport error for an unavailable client"),
        }
    }

    #[tokio::test]
    async fn initialize_against_missing_binary_leaves_non_required_unavailable() {
        let client = McpClient::new(descriptor("/nonexistent/definitely-not-a-binary", vec![]));
        let result = client.initialize().await;
        assert!(result.is_ok());
        assert!(!client.is_available().await);
    }

    #[tokio::test]
    async fn initialize_against_missing_binary_fails_required() {
        let mut desc = descriptor("/nonexistent/definitely-not-a-binary", vec![]);
        desc.required = true;
        let client = McpClient::new(desc);
        assert!(client.initialize().await.is_err());
    }

    #[test]
    fn fatal_transport_error_detection() {
        assert!(is_fatal_transport_error("broken pipe"));
        assert!(is_fatal_transport_error("write to mcp 'x' failed: os error"));
        assert!(!is_fatal_transport_error("timed out after 10ms"));
    }
}
