//! MCP Scanner (C2): walk a root directory and turn each immediate child
//! with a valid, enabled manifest into an `McpDescriptor`. Grounded in
//! `openclaw_core::skills::list_skills`'s directory-walk shape (read_dir,
//! filter to directories, parse a well-known file inside each).

use std::path::Path;

use anyhow::{Context, Result};
use orchestrator_core::{ChannelConfig, Entrypoint, McpDescriptor, McpRole, Origin, OrchestratorConfig};
use tracing::{info, warn};

use crate::manifest::{McpManifest, MANIFEST_FILE_NAME};

fn parse_role(role: &str) -> McpRole {
    match role {
        "guardian" => McpRole::Guardian,
        "channel" => McpRole::Channel,
        _ => McpRole::Default,
    }
}

/// Scan `root`'s immediate children for `mcp.json` manifests, skipping
/// entries without one and entries disabled via manifest `enabled: false`
/// or the env-var switch `<NAME>_MCP_ENABLED=false` (§6). Emits one log
/// line per discovered MCP.
pub fn scan(root: &Path) -> Result<Vec<McpDescriptor>> {
    if !root.exists() {
        info!(root = %root.display(), "mcp root does not exist, no internal mcps discovered");
        return Ok(Vec::new());
    }

    let mut descriptors = Vec::new();
    let mut seen_names = std::collections::HashSet::new();

    let mut entries: Vec<_> = std::fs::read_dir(root)
        .with_context(|| format!("failed to read mcp root: {}", root.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir = entry.path();
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        if !manifest_path.exists() {
            continue;
        }

        let raw = match std::fs::read_to_string(&manifest_path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "failed to read mcp manifest");
                continue;
            }
        };
        let manifest: McpManifest = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "failed to parse mcp manifest");
                continue;
            }
        };

        if !manifest.enabled {
            info!(mcp = %manifest.mcp_name, "mcp disabled via manifest, skipping");
            continue;
        }
        if OrchestratorConfig::mcp_env_disabled(&manifest.mcp_name) {
            info!(mcp = %manifest.mcp_name, "mcp disabled via env switch, skipping");
            continue;
        }
        if !seen_names.insert(manifest.mcp_name.clone()) {
            warn!(mcp = %manifest.mcp_name, "duplicate internal mcp name, skipping");
            continue;
        }

        let channel_config = manifest.channel.as_ref().map(|c| ChannelConfig {
            bot_patterns: c.bot_patterns.clone(),
            chat_refresh_interval_ms: c.chat_refresh_interval_ms,
            max_message_age_ms: c.max_message_age_ms,
        });

        let descriptor = McpDescriptor {
            name: manifest.mcp_name.clone(),
            origin: Origin::Internal,
            entrypoint: Entrypoint::Stdio {
                command: manifest.command.clone(),
                argv: manifest.args.clone(),
                working_directory: Some(dir.clone()),
                env_overrides: manifest.env.clone(),
            },
            timeout_ms: manifest.timeout,
            required: manifest.required,
            sensitive: manifest.sensitive,
            role: parse_role(&manifest.role),
            channel_config,
            allow_destructive_tools: manifest.allow_destructive_tools,
            guardian_input: manifest.guardian_scan.input,
            guardian_output: manifest.guardian_scan.output,
        };

        info!(mcp = %descriptor.name, role = ?descriptor.role, "discovered internal mcp");
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, name: &str, body: &str) {
        let sub = dir.join(name);
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(MANIFEST_FILE_NAME), body).unwrap();
    }

    #[test]
    fn scans_enabled_manifests_and_skips_the_rest() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "mail",
            r#"{"mcpName":"mail","command":"node","args":["index.js"]}"#,
        );
        write_manifest(
            tmp.path(),
            "disabled",
            r#"{"mcpName":"disabled","command":"node","enabled":false}"#,
        );
        fs::create_dir_all(tmp.path().join("no-manifest")).unwrap();

        let found = scan(tmp.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "mail");
    }

    #[test]
    fn missing_root_yields_empty_list() {
        let found = scan(Path::new("/definitely/does/not/exist")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn env_disable_switch_suppresses_discovery() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "vault",
            r#"{"mcpName":"vault","command":"node"}"#,
        );
        std::env::set_var("VAULT_MCP_ENABLED", "false");
        let found = scan(tmp.path()).unwrap();
        std::env::remove_var("VAULT_MCP_ENABLED");
        assert!(found.is_empty());
    }

    #[test]
    fn duplicate_names_keep_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_manifest(tmp.path(), "a-mail", r#"{"mcpName":"mail","command":"node"}"#);
        write_manifest(tmp.path(), "b-mail", r#"{"mcpName":"mail","command":"node"}"#);
        let found = scan(tmp.path()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn channel_manifest_carries_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "telegram",
            r#"{"mcpName":"telegram","command":"node","role":"channel","channel":{"botPatterns":["/bot "]}}"#,
        );
        let found = scan(tmp.path()).unwrap();
        assert_eq!(found[0].role, McpRole::Channel);
        assert!(found[0].channel_config.is_some());
    }
}
