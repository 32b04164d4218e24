//! External MCP Loader + Watcher (C3): parses `external-mcps.json` and
//! watches it for hot-reload, grounded in the pack's
//! `astrid_plugins::watcher::PluginWatcher` shape (a `notify` watcher
//! feeding a debounce-by-deadline select loop) but simplified to a single
//! watched file with equality-based no-op detection instead of content
//! hashing (§4.3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use orchestrator_core::{Entrypoint, McpDescriptor, McpRole, Origin};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExternalEntry {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        sensitive: bool,
        #[serde(default)]
        description: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        sensitive: bool,
        #[serde(default)]
        description: Option<String>,
    },
}

fn default_timeout() -> u64 {
    15_000
}

/// Parsed form of `external-mcps.json`: `{ "<name>": <entry>, ... }`.
pub type ExternalSnapshot = HashMap<String, ExternalEntry>;

/// Per-entry validation errors collected during a load, keyed by name.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub snapshot: ExternalSnapshot,
    pub errors: Vec<(String, String)>,
}

/// Parse the external-MCPs file. Invalid individual entries are collected
/// into `errors` rather than failing the whole load (§4.3).
pub fn load(path: &Path) -> Result<LoadReport> {
    if !path.exists() {
        return Ok(LoadReport::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read external mcps file: {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse external mcps file: {}", path.display()))?;
    let object = document
        .as_object()
        .context("external mcps file must be a JSON object")?;

    let mut report = LoadReport::default();
    for (name, value) in object {
        match serde_json::from_value::<ExternalEntry>(value.clone()) {
            Ok(entry) => {
                report.snapshot.insert(name.clone(), entry);
            }
            Err(e) => {
                report.errors.push((name.clone(), e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Turn a validated snapshot into descriptors, rejecting (with a warning)
/// any external name that collides with an already-known internal name.
pub fn to_descriptors(snapshot: &ExternalSnapshot, internal_names: &[String]) -> Vec<McpDescriptor> {
    let mut descriptors = Vec::new();
    for (name, entry) in snapshot {
        if internal_names.iter().any(|n| n == name) {
            warn!(mcp = %name, "external mcp name collides with an internal mcp, skipping");
            continue;
        }
        let descriptor = match entry {
            ExternalEntry::Stdio {
                command,
                args,
                env,
                timeout,
                required,
                sensitive,
                ..
            } => McpDescriptor {
                name: name.clone(),
                origin: Origin::ExternalStdio,
                entrypoint: Entrypoint::Stdio {
                    command: command.clone(),
                    argv: args.clone(),
                    working_directory: None,
                    env_overrides: env.clone(),
                },
                timeout_ms: *timeout,
                required: *required,
                sensitive: *sensitive,
                role: McpRole::Default,
                channel_config: None,
                allow_destructive_tools: false,
                guardian_input: false,
                guardian_output: false,
            },
            ExternalEntry::Http {
                url,
                headers,
                timeout,
                required,
                sensitive,
                ..
            } => McpDescriptor {
                name: name.clone(),
                origin: Origin::ExternalHttp,
                entrypoint: Entrypoint::Http {
                    url: url.clone(),
                    headers: headers.clone(),
                },
                timeout_ms: *timeout,
                required: *required,
                sensitive: *sensitive,
                role: McpRole::Default,
                channel_config: None,
                allow_destructive_tools: false,
                guardian_input: false,
                guardian_output: false,
            },
        };
        descriptors.push(descriptor);
    }
    descriptors
}

/// A diff between two successive snapshots (§4.3 watcher callback shape).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub added: ExternalSnapshot,
    pub removed: Vec<String>,
}

fn diff_snapshots(old: &ExternalSnapshot, new: &ExternalSnapshot) -> Diff {
    let mut added = ExternalSnapshot::new();
    for (name, entry) in new {
        if old.get(name) != Some(entry) {
            added.insert(name.clone(), entry.clone());
        }
    }
    let removed: Vec<String> = old.keys().filter(|k| !new.contains_key(*k)).cloned().collect();
    Diff { added, removed }
}

/// Event surfaced by the watcher loop.
pub enum WatchEvent {
    Diff(Diff),
    Error(String),
}

/// Watches `path` for modifications, debounces by [`DEBOUNCE`], reloads, and
/// emits a [`WatchEvent::Diff`] only when the parsed content actually
/// changed from the last known-good snapshot. Malformed files surface a
/// [`WatchEvent::Error`] without evicting the previous snapshot (§4.3).
pub struct ExternalMcpWatcher {
    path: PathBuf,
    last_good: ExternalSnapshot,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl ExternalMcpWatcher {
    pub fn new(path: PathBuf, initial: ExternalSnapshot) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .context("failed to initialize external-mcps file watcher")?;

        if let Some(parent) = path.parent() {
            if parent.exists() {
                // Watch the parent directory rather than the file itself so
                // editors that replace-on-save (unlink + rename) are still seen.
                let _ = watcher.watch(parent, RecursiveMode::NonRecursive);
            }
        }

        Ok(Self {
            path,
            last_good: initial,
            watcher,
            raw_rx,
        })
    }

    pub fn snapshot(&self) -> &ExternalSnapshot {
        &self.last_good
    }

    /// Drive the watch loop, invoking `on_event` for each debounced reload.
    /// Returns when the raw event channel closes.
    pub async fn run(mut self, mut on_event: impl FnMut(WatchEvent) + Send) {
        info!(path = %self.path.display(), "watching external mcps file");
        let mut pending_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                () = async {
                    match pending_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    pending_deadline = None;
                    self.reload_and_emit(&mut on_event);
                }
                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => {
                            if matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
                                && ev.paths.iter().any(|p| p == &self.path)
                            {
                                pending_deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                            }
                        }
                        Some(Err(e)) => {
                            on_event(WatchEvent::Error(e.to_string()));
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn reload_and_emit(&mut self, on_event: &mut impl FnMut(WatchEvent)) {
        match load(&self.path) {
            Ok(report) => {
                for (name, error) in &report.errors {
                    warn!(mcp = %name, error = %error, "invalid external mcp entry, skipping");
                }
                if report.snapshot == self.last_good {
                    return;
                }
                let diff = diff_snapshots(&self.last_good, &report.snapshot);
                self.last_good = report.snapshot;
                if !diff.added.is_empty() || !diff.removed.is_empty() {
                    on_event(WatchEvent::Diff(diff));
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to reload external mcps file, keeping previous snapshot");
                on_event(WatchEvent::Error(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_stdio_and_http_entries() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("external-mcps.json");
        std::fs::write(
            &path,
            r#"{
                "weather": {"type": "stdio", "command": "node", "args": ["weather.js"]},
                "search": {"type": "http", "url": "https://example.com/mcp"}
            }"#,
        )
        .unwrap();
        let report = load(&path).unwrap();
        assert_eq!(report.snapshot.len(), 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn invalid_entries_collected_not_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("external-mcps.json");
        std::fs::write(
            &path,
            r#"{
                "good": {"type": "stdio", "command": "node"},
                "bad": {"type": "carrier-pigeon"}
            }"#,
        )
        .unwrap();
        let report = load(&path).unwrap();
        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "bad");
    }

    #[test]
    fn missing_file_yields_empty_snapshot() {
        let report = load(Path::new("/definitely/missing.json")).unwrap();
        assert!(report.snapshot.is_empty());
    }

    #[test]
    fn collision_with_internal_name_is_skipped() {
        let mut snapshot = ExternalSnapshot::new();
        snapshot.insert(
            "mail".to_string(),
            ExternalEntry::Stdio {
                command: "node".into(),
                args: vec![],
                env: HashMap::new(),
                timeout: 1000,
                required: false,
                sensitive: false,
                description: None,
            },
        );
        let descriptors = to_descriptors(&snapshot, &["mail".to_string()]);
        assert!(descriptors.is_empty());
    }

    #[test]
    fn diff_detects_added_and_removed() {
        let mut old = ExternalSnapshot::new();
        old.insert(
            "x".to_string(),
            ExternalEntry::Http {
                url: "https://x".into(),
                headers: HashMap::new(),
                timeout: 1000,
                required: false,
                sensitive: false,
                description: None,
            },
        );
        let mut new = ExternalSnapshot::new();
        new.insert(
            "y".to_string(),
            ExternalEntry::Http {
                url: "https://y".into(),
                headers: HashMap::new(),
                timeout: 1000,
                required: false,
                sensitive: false,
                description: None,
            },
        );
        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.removed, vec!["x".to_string()]);
        assert!(diff.added.contains_key("y"));
    }

    #[test]
    fn diff_is_empty_for_identical_snapshots() {
        let mut snap = ExternalSnapshot::new();
        snap.insert(
            "x".to_string(),
            ExternalEntry::Http {
                url: "https://x".into(),
                headers: HashMap::new(),
                timeout: 1000,
                required: false,
                sensitive: false,
                description: None,
            },
        );
        let diff = diff_snapshots(&snap, &snap.clone());
        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[tokio::test]
    async fn reload_and_emit_no_ops_on_unchanged_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("external-mcps.json");
        std::fs::write(&path, r#"{"x": {"type": "stdio", "command": "node"}}"#).unwrap();
        let report = load(&path).unwrap();
        let mut watcher = ExternalMcpWatcher::new(path.clone(), report.snapshot).unwrap();

        let mut events = Vec::new();
        watcher.reload_and_emit(&mut |e| events.push(matches!(e, WatchEvent::Diff(_))));
        assert!(events.is_empty(), "unchanged content must not emit a diff");
    }
}
