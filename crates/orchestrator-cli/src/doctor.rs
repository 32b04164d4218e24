//! One-shot diagnostics, run without starting the front server. Grounded in
//! `openclaw-gateway::doctor::run_checks`'s `(name, passed, detail)` report
//! shape, generalized from agent/session/skills checks to MCP-fleet checks.

use std::path::PathBuf;

use colored::Colorize;
use orchestrator_core::OrchestratorConfig;
use orchestrator_mcp::{external_to_descriptors, load_external, scan, McpClient};

async fn run_checks(config: &OrchestratorConfig) -> Vec<(String, bool, String)> {
    let mut checks = Vec::new();

    let mcp_root_exists = config.mcp_root.exists();
    checks.push((
        "MCP root".to_string(),
        mcp_root_exists,
        if mcp_root_exists {
            format!("{}", config.mcp_root.display())
        } else {
            format!("missing: {}", config.mcp_root.display())
        },
    ));

    let descriptors = match scan(&config.mcp_root) {
        Ok(d) => {
            checks.push(("Internal MCP scan".to_string(), true, format!("{} mcp(s) discovered", d.len())));
            d
        }
        Err(e) => {
            checks.push(("Internal MCP scan".to_string(), false, e.to_string()));
            Vec::new()
        }
    };

    let internal_names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
    match load_external(&config.external_mcps_path) {
        Ok(report) => {
            let external = external_to_descriptors(&report.snapshot, &internal_names);
            checks.push((
                "External MCPs file".to_string(),
                report.errors.is_empty(),
                format!("{} entr(ies), {} invalid", external.len(), report.errors.len()),
            ));
        }
        Err(e) => checks.push(("External MCPs file".to_string(), false, e.to_string())),
    }

    let guardian_present = descriptors.iter().any(|d| d.is_guardian());
    checks.push((
        "Guardian MCP".to_string(),
        guardian_present || config.guardian_fail_mode == orchestrator_core::FailMode::Open,
        if guardian_present {
            "present".to_string()
        } else {
            format!("absent (fail mode: {:?})", config.guardian_fail_mode)
        },
    ));

    for descriptor in &descriptors {
        let client = McpClient::new(descriptor.clone());
        let available = client.initialize().await.is_ok();
        client.close().await;
        checks.push((
            format!("mcp:{}", descriptor.name),
            available,
            if available { "reachable".to_string() } else { "failed to start".to_string() },
        ));
    }

    checks.push(("Audit log directory".to_string(), writable_parent(&config.audit_log_path), config.audit_log_path.display().to_string()));

    checks
}

fn writable_parent(path: &std::path::Path) -> bool {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent).is_ok(),
        None => true,
    }
}

pub async fn run(config_override: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_override.unwrap_or_else(|| orchestrator_core::paths::orchestrator_home().join("orchestrator.json"));
    let config = OrchestratorConfig::from_file_or_env(&path).unwrap_or_default();

    println!("{}", "orchestrator doctor".bold());
    let checks = run_checks(&config).await;

    let mut all_ok = true;
    for (name, passed, detail) in &checks {
        all_ok &= *passed;
        let mark = if *passed { "ok".green() } else { "fail".red() };
        println!("  [{}] {:<28} {}", mark, name, detail);
    }

    if all_ok {
        println!("{}", "all checks passed".green());
        Ok(())
    } else {
        println!("{}", "one or more checks failed".red());
        std::process::exit(1);
    }
}
