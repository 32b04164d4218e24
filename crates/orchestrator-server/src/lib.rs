//! Orchestrator Server (C9): the front MCP interface a calling agent talks
//! to, plus the operator-facing HTTP status surface (§4.9, §6).

pub mod custom_tools;
pub mod dispatch;
pub mod http;
pub mod metrics;
pub mod stdio;

pub use dispatch::{error_result, OrchestratorServer};
pub use http::{router, AppState};
pub use metrics::ServerMetrics;
pub use stdio::{handle_request, run_stdio};
