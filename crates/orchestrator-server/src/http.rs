//! `[AMBIENT]` operator HTTP surface (§6): `/health`, `/ready`, `/status`,
//! `/metrics`. Grounded in `openclaw-gateway::main`'s `health_handler` /
//! `ready_handler` / `status_handler` / `metrics_handler` quartet, scoped to
//! orchestrator-level facts (MCP availability, route count, agent count,
//! Guardian mode, uptime) instead of gateway/session facts. Also used as
//! the optional HTTP+SSE front transport for `tools/list`/`tools/call`
//! (§4.9 `[AMBIENT] Transport`) when a deployment wants the Orchestrator
//! reachable over a network boundary rather than stdio.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use orchestrator_core::FailMode;
use orchestrator_mcp::JsonRpcRequest;
use serde_json::json;

use crate::dispatch::OrchestratorServer;
use crate::metrics::ServerMetrics;
use crate::stdio::handle_request;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<OrchestratorServer>,
    pub metrics: Arc<ServerMetrics>,
}

/// Builds the router. `rpc` fronts the same dispatch the stdio transport
/// uses, so a caller can point an HTTP client at `/rpc` instead of piping
/// newline-delimited JSON-RPC over a child's stdio.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/rpc", post(rpc))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let clients = state.server.client_snapshot();
    let mut available = 0usize;
    for client in clients.values() {
        if client.is_available().await {
            available += 1;
        }
    }
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mcps_total": clients.len(),
        "mcps_available": available,
        "routes_total": state.server.route_snapshot().len(),
        "uptime_s": state.server.uptime().as_secs(),
    }))
}

/// 503 unless every `required` MCP is `Available` (SPEC_FULL.md §6).
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let clients = state.server.client_snapshot();
    let mut missing = Vec::new();
    for client in clients.values() {
        if client.descriptor().required && !client.is_available().await {
            missing.push(client.name.clone());
        }
    }
    if missing.is_empty() {
        (StatusCode::OK, Json(json!({"ready": true}))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"ready": false, "missingRequired": missing}))).into_response()
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agents = state.server.agents().statuses().await;
    let guardian_mode = match state.server.config().guardian_fail_mode {
        FailMode::Open => "open",
        FailMode::Closed => "closed",
    };
    Json(json!({
        "uptimeS": state.server.uptime().as_secs(),
        "agents": agents,
        "guardianEnabled": state.server.guardian().is_enabled(),
        "guardianFailMode": guardian_mode,
        "routesTotal": state.server.route_snapshot().len(),
        "blockedTools": state.server.route_snapshot().blocked(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

async fn rpc(State(state): State<AppState>, Json(request): Json<JsonRpcRequest>) -> Json<serde_json::Value> {
    let response = handle_request(&state.server, &state.metrics, &request).await;
    Json(serde_json::to_value(response).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_agents::{AgentManager, SubagentSupervisor};
    use orchestrator_core::OrchestratorConfig;
    use orchestrator_router::{GuardianFlags, GuardianPipeline, RouteTable};
    use std::collections::HashMap;

    fn state() -> AppState {
        let config = OrchestratorConfig::default();
        let routes = Arc::new(RouteTable::build(&[], &config));
        let tmp = tempfile::TempDir::new().unwrap();
        let guardian = Arc::new(GuardianPipeline::new(
            None,
            FailMode::Closed,
            false,
            GuardianFlags::new(false, false),
            tmp.path().join("audit.jsonl"),
        ));
        let agents = Arc::new(AgentManager::new("stdio://orchestrator"));
        let subagents = Arc::new(SubagentSupervisor::new(agents.clone(), &config, "stdio://orchestrator"));
        let server = Arc::new(OrchestratorServer::new(
            routes,
            HashMap::new(),
            guardian,
            HashMap::new(),
            agents,
            subagents,
            Arc::new(config),
        ));
        AppState { server, metrics: Arc::new(ServerMetrics::new()) }
    }

    #[tokio::test]
    async fn ready_with_no_required_mcps_is_ready() {
        let response = ready(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_zero_mcps_when_fleet_empty() {
        let body = health(State(state())).await.0;
        assert_eq!(body["mcps_total"], 0);
    }
}
