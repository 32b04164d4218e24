//! `orchestrator status`: query a running instance's HTTP surface.
//! Grounded in `openclaw-cli::commands::gateway::status`'s
//! reqwest-get-and-print shape.

use colored::Colorize;

pub async fn run(base_url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().timeout(std::time::Duration::from_secs(10)).build()?;

    let health: serde_json::Value = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("cannot reach orchestrator at {}: {}", base_url, e))?
        .json()
        .await?;

    let ready_code = client.get(format!("{}/ready", base_url)).send().await?.status();
    let status: serde_json::Value = client.get(format!("{}/status", base_url)).send().await?.json().await?;

    println!("{}", "orchestrator status".bold());
    println!(
        "  health: {} ({}/{} mcps available)",
        "ok".green(),
        health["mcps_available"],
        health["mcps_total"]
    );
    println!(
        "  ready:  {}",
        if ready_code.is_success() { "yes".green() } else { "no".red() }
    );
    println!("  uptime: {}s", status["uptimeS"]);
    println!("  guardian: enabled={} mode={}", status["guardianEnabled"], status["guardianFailMode"]);
    println!("  routes: {}", status["routesTotal"]);
    if let Some(agents) = status["agents"].as_array() {
        println!("  agents: {}", agents.len());
        for agent in agents {
            println!("    - {} [{}]", agent["agentId"], agent["state"]);
        }
    }

    Ok(())
}
