use std::path::PathBuf;

/// Returns the Orchestrator home directory (`~/.orchestrator`).
pub fn orchestrator_home() -> PathBuf {
    dirs::home_dir()
        .expect("could not determine home directory")
        .join(".orchestrator")
}

/// Default root directory scanned for internal MCP packages.
pub fn default_mcp_root() -> PathBuf {
    orchestrator_home().join("mcps")
}

/// Default path to the external-MCPs hot-reload config file.
pub fn default_external_mcps_path() -> PathBuf {
    orchestrator_home().join("external-mcps.json")
}

/// Default path to the Guardian audit JSONL log.
pub fn default_audit_log_path() -> PathBuf {
    orchestrator_home().join("guardian-audit.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_nest_under_home() {
        assert!(default_mcp_root().starts_with(orchestrator_home()));
        assert!(default_external_mcps_path().starts_with(orchestrator_home()));
    }
}
