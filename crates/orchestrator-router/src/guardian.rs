//! Guardian Pipeline (C5): a decorator around the router's dispatch point,
//! scanning tool args/results through a designated Guardian MCP with
//! fail-open/fail-closed semantics and an append-only JSONL audit trail.
//! Grounded in the decorator-to-middleware redesign flag (§9): rather than
//! wrapping each MCP client individually, this sits at the single place the
//! router actually forwards a call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use orchestrator_core::{FailMode, OrchError};
use orchestrator_mcp::{CallOutcome, McpClient, ToolCallResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GuardianScanResponse {
    safe: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    threats: Vec<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuditEntry {
    scan_id: String,
    timestamp: String,
    source: &'static str,
    tool: String,
    mcp: String,
    content_hash: String,
    content_length: usize,
    safe: bool,
    confidence: Option<f64>,
    threats: Vec<String>,
    model: Option<String>,
    latency_ms: u64,
}

/// Per-MCP default scan flags, merged with per-agent overrides at call time
/// (§3 `GuardianFlags`, lowest → highest: global default, per-MCP, per-agent).
#[derive(Debug, Clone, Default)]
pub struct GuardianFlags {
    default_input: bool,
    default_output: bool,
    per_mcp: std::collections::HashMap<String, (bool, bool)>,
    per_agent_overrides: std::collections::HashMap<String, (Option<bool>, Option<bool>)>,
}

impl GuardianFlags {
    pub fn new(default_input: bool, default_output: bool) -> Self {
        Self {
            default_input,
            default_output,
            per_mcp: Default::default(),
            per_agent_overrides: Default::default(),
        }
    }

    pub fn set_mcp(&mut self, mcp_name: impl Into<String>, input: bool, output: bool) {
        self.per_mcp.insert(mcp_name.into(), (input, output));
    }

    pub fn set_agent_override(&mut self, agent_id: impl Into<String>, input: Option<bool>, output: Option<bool>) {
        self.per_agent_overrides.insert(agent_id.into(), (input, output));
    }

    pub fn effective(&self, mcp_name: &str, agent_id: Option<&str>) -> (bool, bool) {
        let (mut input, mut output) = self
            .per_mcp
            .get(mcp_name)
            .copied()
            .unwrap_or((self.default_input, self.default_output));

        if let Some(agent_id) = agent_id {
            if let Some((override_input, override_output)) = self.per_agent_overrides.get(agent_id) {
                if let Some(v) = override_input {
                    input = *v;
                }
                if let Some(v) = override_output {
                    output = *v;
                }
            }
        }
        (input, output)
    }
}

/// The Guardian decorator. `guardian_client` is `None` when no MCP in the
/// fleet declared `role=guardian`, which implicitly disables scanning
/// regardless of configured flags.
pub struct GuardianPipeline {
    guardian_client: Option<McpClient>,
    guardian_mcp_name: Option<String>,
    fail_mode: FailMode,
    output_advisory: bool,
    flags: GuardianFlags,
    audit_log_path: PathBuf,
    audit_lock: Arc<Mutex<()>>,
}

impl GuardianPipeline {
    pub fn new(
        guardian_client: Option<McpClient>,
        fail_mode: FailMode,
        output_advisory: bool,
        flags: GuardianFlags,
        audit_log_path: PathBuf,
    ) -> Self {
        let guardian_mcp_name = guardian_client.as_ref().map(|c| c.name.clone());
        Self {
            guardian_client,
            guardian_mcp_name,
            fail_mode,
            output_advisory,
            flags,
            audit_log_path,
            audit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.guardian_client.is_some()
    }

    /// Wraps a single dispatch: input scan → forward (caller-supplied) →
    /// output scan. `forward` performs the actual `McpClient::call_tool`
    /// (owned by the router/server, not this pipeline) so the pipeline stays
    /// decoupled from client lookup.
    pub async fn dispatch<F, Fut>(
        &self,
        tool: &str,
        mcp_name: &str,
        agent_id: Option<&str>,
        args: Value,
        forward: F,
    ) -> Result<ToolCallResult, OrchError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: std::future::Future<Output = CallOutcome>,
    {
        // Guardian never scans its own traffic (§4.5 "never scanned").
        let is_guardian_self = self.guardian_mcp_name.as_deref() == Some(mcp_name);

        let (input_flag, output_flag) = if is_guardian_self {
            (false, false)
        } else {
            self.flags.effective(mcp_name, agent_id)
        };

        if input_flag && self.is_enabled() {
            match self.scan(Direction::Input, tool, mcp_name, &args).await {
                ScanOutcome::Blocked(rationale) => {
                    return Err(OrchError::security_blocked(
                        "blocked by security scan",
                        Some(rationale),
                    ));
                }
                ScanOutcome::GuardianDown => {
                    if self.fail_mode == FailMode::Closed {
                        return Err(OrchError::security_blocked("security service unavailable", None));
                    }
                }
                ScanOutcome::Safe => {}
            }
        }

        let result = match forward(args).await {
            CallOutcome::Ok(result) => result,
            CallOutcome::Err(e) => return Err(e),
        };

        if output_flag && self.is_enabled() {
            let serialized = serde_json::to_value(result.text().unwrap_or_default())
                .unwrap_or(Value::Null);
            match self.scan(Direction::Output, tool, mcp_name, &serialized).await {
                ScanOutcome::Blocked(rationale) => {
                    if self.output_advisory {
                        warn!(tool, mcp_name, rationale, "advisory: output scan flagged content");
                    } else {
                        // Side effect already occurred; this is documented
                        // as an acknowledged tradeoff (§4.5 step 5).
                        return Err(OrchError::security_blocked(
                            "blocked by security scan",
                            Some(rationale),
                        ));
                    }
                }
                ScanOutcome::GuardianDown => {
                    if self.fail_mode == FailMode::Closed && !self.output_advisory {
                        return Err(OrchError::security_blocked("security service unavailable", None));
                    }
                }
                ScanOutcome::Safe => {}
            }
        }

        Ok(result)
    }

    async fn scan(&self, direction: Direction, tool: &str, mcp_name: &str, content: &Value) -> ScanOutcome {
        let Some(guardian) = &self.guardian_client else {
            return ScanOutcome::Safe;
        };

        let serialized = content.to_string();
        let content_hash = hex::encode(Sha256::digest(serialized.as_bytes()));
        let content_length = serialized.len();

        let started = Instant::now();
        let params = serde_json::json!({
            "direction": direction.as_str(),
            "tool": tool,
            "mcp": mcp_name,
            "content": content,
        });
        let outcome = guardian.call_tool("scan", params).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (safe, confidence, threats, rationale, model) = match outcome {
            CallOutcome::Ok(result) => match result
                .text()
                .and_then(|t| serde_json::from_str::<GuardianScanResponse>(t).ok())
            {
                Some(parsed) => (
                    parsed.safe,
                    parsed.confidence,
                    parsed.threats,
                    parsed.rationale,
                    parsed.model,
                ),
                None => {
                    warn!("guardian returned an unparseable scan response");
                    self.audit(direction, tool, mcp_name, &content_hash, content_length, false, None, vec![], None, latency_ms).await;
                    return ScanOutcome::GuardianDown;
                }
            },
            CallOutcome::Err(_) => {
                self.audit(direction, tool, mcp_name, &content_hash, content_length, false, None, vec![], None, latency_ms).await;
                return ScanOutcome::GuardianDown;
            }
        };

        self.audit(direction, tool, mcp_name, &content_hash, content_length, safe, confidence, threats.clone(), model, latency_ms).await;

        if safe {
            ScanOutcome::Safe
        } else {
            ScanOutcome::Blocked(rationale.unwrap_or_else(|| format!("threats detected: {}", threats.join(", "))))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        direction: Direction,
        tool: &str,
        mcp_name: &str,
        content_hash: &str,
        content_length: usize,
        safe: bool,
        confidence: Option<f64>,
        threats: Vec<String>,
        model: Option<String>,
        latency_ms: u64,
    ) {
        let entry = AuditEntry {
            scan_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: direction.as_str(),
            tool: tool.to_string(),
            mcp: mcp_name.to_string(),
            content_hash: content_hash.to_string(),
            content_length,
            safe,
            confidence,
            threats,
            model,
            latency_ms,
        };

        let _guard = self.audit_lock.lock().await;
        if let Some(parent) = self.audit_log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create audit log directory");
                return;
            }
        }
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };
        use std::io::Write;
        match std::fs::OpenOptions::new().create(true).append(true).open(&self.audit_log_path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    warn!(error = %e, "failed to append audit log entry");
                }
            }
            Err(e) => warn!(error = %e, "failed to open audit log"),
        }
    }
}

enum ScanOutcome {
    Safe,
    Blocked(String),
    GuardianDown,
}
