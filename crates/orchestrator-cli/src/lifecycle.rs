//! Startup/shutdown sequencing (§4.10). Grounded in
//! `openclaw-gateway::main`'s phased startup (config → verify → background
//! tasks → serve loop) and its `tokio::select!` shutdown race, generalized
//! from one Telegram bot to an arbitrary MCP fleet plus agent roster.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use orchestrator_agents::{AgentManager, SubagentSupervisor};
use orchestrator_channels::{ChannelBindings, ChannelPoller};
use orchestrator_core::{CallerMessage, FailMode, McpDescriptor, Origin, OrchestratorConfig};
use orchestrator_mcp::{external_to_descriptors, load_external, scan, Diff, ExternalMcpWatcher, McpClient, WatchEvent};
use orchestrator_router::{GuardianFlags, GuardianPipeline, McpToolSource, RouteTable, ToolPolicy};
use orchestrator_server::{run_stdio, OrchestratorServer, ServerMetrics};
use tracing::{error, info, warn};

fn config_path(override_path: Option<PathBuf>) -> PathBuf {
    override_path.unwrap_or_else(|| orchestrator_core::paths::orchestrator_home().join("orchestrator.json"))
}

/// Discover every MCP (internal + external), spawn clients for each, and
/// initialize the Guardian first (§4.10 steps 2-4).
async fn discover_and_spawn(config: &OrchestratorConfig) -> Result<HashMap<String, McpClient>> {
    let mut descriptors = scan(&config.mcp_root).context("internal mcp scan failed")?;
    let internal_names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();

    let report = load_external(&config.external_mcps_path).context("external mcps load failed")?;
    for (name, err) in &report.errors {
        warn!(mcp = name, error = %err, "skipping invalid external mcp entry at startup");
    }
    descriptors.extend(external_to_descriptors(&report.snapshot, &internal_names));

    let mut clients = HashMap::new();
    let guardian = descriptors.iter().find(|d| d.is_guardian()).cloned();

    if let Some(guardian_descriptor) = guardian {
        let client = McpClient::new(guardian_descriptor.clone());
        match client.initialize().await {
            Ok(()) => info!(mcp = %guardian_descriptor.name, "guardian mcp available"),
            Err(e) => {
                if guardian_descriptor.required || config.guardian_fail_mode == FailMode::Closed {
                    bail!("guardian mcp '{}' failed to start: {}", guardian_descriptor.name, e);
                }
                warn!(mcp = %guardian_descriptor.name, error = %e, "guardian mcp failed to start, proceeding fail-open");
            }
        }
        clients.insert(guardian_descriptor.name.clone(), client);
    }

    let rest: Vec<McpDescriptor> = descriptors.into_iter().filter(|d| !d.is_guardian()).collect();
    let mut handles = Vec::with_capacity(rest.len());
    for descriptor in rest {
        handles.push(tokio::spawn(async move {
            let client = McpClient::new(descriptor.clone());
            let outcome = client.initialize().await;
            (descriptor, client, outcome)
        }));
    }

    let mut failed_required = Vec::new();
    for handle in handles {
        let (descriptor, client, outcome) = handle.await.context("mcp startup task panicked")?;
        match outcome {
            Ok(()) => info!(mcp = %descriptor.name, "mcp available"),
            Err(e) => {
                warn!(mcp = %descriptor.name, error = %e, "mcp failed to start");
                if descriptor.required {
                    failed_required.push(descriptor.name.clone());
                }
            }
        }
        clients.insert(descriptor.name, client);
    }

    if !failed_required.is_empty() {
        bail!("required mcp(s) failed to start: {}", failed_required.join(", "));
    }

    Ok(clients)
}

/// Applies one external-mcps add/remove diff to the live server (§4.3, C3):
/// closes clients for removed names, spawns clients for added ones, then
/// rebuilds the route table over the resulting client set and swaps both
/// into the server via `update_clients`/`update_routes`. Runs on a single
/// consumer task so diffs are applied one at a time, in arrival order (§5
/// "Configuration diffs from the watcher are delivered sequentially").
async fn apply_external_diff(server: &Arc<OrchestratorServer>, config: &OrchestratorConfig, diff: Diff, internal_names: &[String]) {
    let mut clients: HashMap<String, McpClient> = (*server.client_snapshot()).clone();

    for name in &diff.removed {
        if let Some(client) = clients.remove(name) {
            client.close().await;
            info!(mcp = %name, "external mcp removed, client closed");
        }
    }

    for descriptor in external_to_descriptors(&diff.added, internal_names) {
        let name = descriptor.name.clone();
        let client = McpClient::new(descriptor.clone());
        match client.initialize().await {
            Ok(()) => {
                info!(mcp = %name, "external mcp added, client available");
                clients.insert(name, client);
            }
            Err(e) => {
                warn!(mcp = %name, error = %e, "newly added external mcp failed to start, skipping");
            }
        }
    }

    let routes = Arc::new(build_routes(&clients, config).await);
    info!(routes = routes.len(), blocked = routes.blocked().len(), "route table rebuilt after external mcps reload");
    server.update_routes(routes);
    server.update_clients(clients);
}

/// Tool discovery + route table build (§4.10 step 5).
async fn build_routes(clients: &HashMap<String, McpClient>, config: &OrchestratorConfig) -> RouteTable {
    let mut sources = Vec::new();
    for (name, client) in clients {
        if !client.is_available().await {
            continue;
        }
        let tools = client.list_tools().await;
        sources.push(McpToolSource {
            mcp_name: name.clone(),
            allow_destructive_tools: client.descriptor().allow_destructive_tools,
            tools,
        });
    }
    RouteTable::build(&sources, config)
}

fn build_guardian(clients: &HashMap<String, McpClient>, config: &OrchestratorConfig) -> Arc<GuardianPipeline> {
    let guardian_client = clients
        .values()
        .find(|c| c.descriptor().is_guardian())
        .cloned();

    let mut flags = GuardianFlags::new(false, false);
    for client in clients.values() {
        let descriptor = client.descriptor();
        flags.set_mcp(descriptor.name.clone(), descriptor.guardian_input, descriptor.guardian_output);
    }

    Arc::new(GuardianPipeline::new(
        guardian_client,
        config.guardian_fail_mode,
        config.guardian_output_advisory,
        flags,
        config.audit_log_path.clone(),
    ))
}

fn build_agent_policies(config: &OrchestratorConfig) -> HashMap<String, ToolPolicy> {
    config
        .agents
        .iter()
        .map(|agent| {
            let allowed = (!agent.allowed_tools.is_empty()).then_some(agent.allowed_tools.as_slice());
            (agent.agent_id.clone(), ToolPolicy::new(allowed, &agent.denied_tools))
        })
        .collect()
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

pub async fn run(config_override: Option<PathBuf>, http: bool) -> anyhow::Result<()> {
    let path = config_path(config_override);
    let config = Arc::new(OrchestratorConfig::from_file_or_env(&path).unwrap_or_else(|e| {
        warn!(error = %e, path = %path.display(), "failed to load config, using defaults");
        OrchestratorConfig::default()
    }));

    info!("orchestrator v{} starting", env!("CARGO_PKG_VERSION"));
    info!(mcp_root = %config.mcp_root.display(), http_bind = %config.http_bind, "configuration loaded");

    let clients = discover_and_spawn(&config).await?;
    let routes = Arc::new(build_routes(&clients, &config).await);
    info!(routes = routes.len(), blocked = routes.blocked().len(), "route table built");

    let guardian = build_guardian(&clients, &config);
    let agent_policies = build_agent_policies(&config);

    let mcp_endpoint = format!("http://{}", config.http_bind);
    let agents = Arc::new(AgentManager::new(mcp_endpoint.clone()));
    let subagents = Arc::new(SubagentSupervisor::new(agents.clone(), &config, mcp_endpoint));

    let server = Arc::new(OrchestratorServer::new(
        routes,
        clients,
        guardian,
        agent_policies,
        agents.clone(),
        subagents,
        config.clone(),
    ));
    let metrics = Arc::new(ServerMetrics::new());

    // Step 6: external-mcps watcher. Each debounced diff is applied to the
    // live server: removed entries' clients are closed, added entries are
    // spawned, and the route table is rebuilt and swapped in
    // (`apply_external_diff`). Diffs are forwarded over a channel so the
    // (sync) watcher callback never blocks on the async apply step, and are
    // drained by a single consumer task so they apply in arrival order.
    let internal_names: Vec<String> = server
        .client_snapshot()
        .values()
        .filter(|c| c.descriptor().origin == Origin::Internal)
        .map(|c| c.name.clone())
        .collect();
    let initial_external = load_external(&config.external_mcps_path).unwrap_or_default().snapshot;
    let (diff_tx, mut diff_rx) = tokio::sync::mpsc::unbounded_channel::<WatchEvent>();
    let watcher_handle = ExternalMcpWatcher::new(config.external_mcps_path.clone(), initial_external)
        .ok()
        .map(|watcher| {
            tokio::spawn(watcher.run(move |event| {
                let _ = diff_tx.send(event);
            }))
        });
    let reload_server = server.clone();
    let reload_config = config.clone();
    let reload_handle = tokio::spawn(async move {
        while let Some(event) = diff_rx.recv().await {
            match event {
                WatchEvent::Diff(diff) => {
                    info!(added = diff.added.len(), removed = diff.removed.len(), "external mcps file changed");
                    apply_external_diff(&reload_server, &reload_config, diff, &internal_names).await;
                }
                WatchEvent::Error(e) => warn!(error = %e, "external mcps watcher error"),
            }
        }
    });

    // Step 7: agents.
    agents.start_all(&config).await.context("failed to start configured agents")?;

    // Step 8: channel poller.
    let default_agent = agents.default_agent_id().await.unwrap_or_else(|| "default".to_string());
    let mut bindings = ChannelBindings::new(default_agent);
    for entry in &config.channel_bindings {
        bindings.bind(entry.channel.clone(), entry.chat_id.clone(), entry.agent_id.clone());
    }
    let agents_for_poller = agents.clone();
    let mut poller = ChannelPoller::new(
        bindings,
        std::time::Duration::from_millis(config.channel_poll_interval_ms),
        std::time::Duration::from_millis(config.channel_refresh_interval_ms),
        std::time::Duration::from_millis(config.channel_max_message_age_ms),
        config.channel_max_messages_per_cycle,
        move |message| {
            let agents = agents_for_poller.clone();
            async move {
                let caller: CallerMessage = message.into();
                if let Err(e) = agents.on_message(caller).await {
                    warn!(error = %e, "channel message dispatch failed");
                }
            }
        },
    );
    for client in server.client_snapshot().values() {
        if client.descriptor().is_channel() {
            let channel_config = client.descriptor().channel_config.clone().unwrap_or_default();
            poller.register(client.name.clone(), client.clone(), channel_config);
        }
    }
    let (poller_shutdown_tx, poller_shutdown_rx) = tokio::sync::oneshot::channel();
    let poller_handle = tokio::spawn(poller.run(async {
        let _ = poller_shutdown_rx.await;
    }));

    // Step 9: front server(s), racing against the signal future.
    let http_handle = http.then(|| {
        let app_state = orchestrator_server::AppState { server: server.clone(), metrics: metrics.clone() };
        let bind = config.http_bind.clone();
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!(%bind, "http status surface listening");
            axum::serve(listener, orchestrator_server::router(app_state))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("http server failed")
        })
    });

    run_stdio(&server, &metrics, shutdown_signal()).await.context("stdio front server failed")?;

    info!("shutdown signal received, draining subsystems");
    let _ = poller_shutdown_tx.send(());
    let _ = poller_handle.await;
    if let Some(handle) = watcher_handle {
        handle.abort();
    }
    reload_handle.abort();
    agents.shutdown().await;
    for client in server.client_snapshot().values() {
        client.close().await;
    }
    if let Some(handle) = http_handle {
        match tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "http server exited with error"),
            Ok(Err(e)) => error!(error = %e, "http server task panicked"),
            Err(_) => warn!("http server did not shut down within grace window"),
        }
    }

    info!("orchestrator shutdown complete");
    Ok(())
}
