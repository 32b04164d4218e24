//! Orchestrator CLI: the `run`/`doctor`/`status` binary. Grounded in
//! `openclaw-gateway::main`'s startup banner + config-load + signal-handled
//! serve loop, and `openclaw-cli::commands::gateway`'s reqwest-based query
//! subcommands, fused into a single binary (`openclaw-gateway` and
//! `openclaw-cli` are two binaries; this system has one front process, so
//! both live here).

mod doctor;
mod lifecycle;
mod status;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orchestrator", version, about = "Multi-agent MCP Orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Orchestrator: discover MCPs, spawn agents, serve tools/list
    /// and tools/call over stdio (and optionally HTTP) until a signal arrives.
    Run {
        /// Path to the JSON config file (defaults to ~/.orchestrator/orchestrator.json)
        #[arg(long)]
        config: Option<std::path::PathBuf>,
        /// Also serve the HTTP status surface and /rpc alongside stdio
        #[arg(long, default_value_t = false)]
        http: bool,
    },
    /// One-shot health checks against the on-disk MCP fleet and config,
    /// without starting the stdio front server.
    Doctor {
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
    /// Query a running Orchestrator's HTTP status surface.
    Status {
        /// Base URL of the running Orchestrator's HTTP surface
        #[arg(long, env = "ORCHESTRATOR_URL", default_value = "http://127.0.0.1:7800")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "orchestrator=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, http } => lifecycle::run(config, http).await,
        Commands::Doctor { config } => doctor::run(config).await,
        Commands::Status { url } => status::run(&url).await,
    }
}
