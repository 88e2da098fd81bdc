//! Optional persisted `{Name, ProcessId, ProcessName, StartTime}` tuples
//! (§6 "Persistent state"), one JSON file per service, so a controller
//! re-created after the supervisor itself restarts has something to adopt
//! from on its first `Check`.
//!
//! Modeled on the teacher's `jobstore.rs` (`resolve_root` precedence chain,
//! `write_state`/`read_state` via `serde_json::to_string_pretty`).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

/// Resolution order for the state root: `--state-dir`/env override, then
/// `$XDG_DATA_HOME/svc-supervisor/state`, then
/// `~/.local/share/svc-supervisor/state`.
pub fn resolve_root(cli_root: Option<&str>) -> PathBuf {
    if let Some(root) = cli_root {
        return PathBuf::from(root);
    }
    if let Ok(root) = std::env::var("SVC_SUPERVISOR_STATE_DIR") {
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("svc-supervisor").join("state");
        }
    }
    if let Some(base_dirs) = BaseDirs::new() {
        #[cfg(windows)]
        let base = base_dirs.data_local_dir().to_path_buf();
        #[cfg(not(windows))]
        let base = base_dirs.home_dir().join(".local").join("share");
        return base.join("svc-supervisor").join("state");
    }
    PathBuf::from("~/.local/share/svc-supervisor/state")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub name: String,
    pub process_id: u32,
    pub process_name: String,
    /// Unix seconds; `SystemTime` itself isn't `Serialize`.
    pub start_time_unix: u64,
}

fn file_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.json"))
}

pub fn write(root: &Path, state: &PersistedState) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    let contents = serde_json::to_string_pretty(state)?;
    std::fs::write(file_path(root, &state.name), contents)
}

pub fn read(root: &Path, name: &str) -> Option<PersistedState> {
    let raw = std::fs::read(file_path(root, name)).ok()?;
    serde_json::from_slice(&raw).ok()
}

pub fn remove(root: &Path, name: &str) {
    let _ = std::fs::remove_file(file_path(root, name));
}

pub fn to_unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let state = PersistedState {
            name: "svc1".into(),
            process_id: 4242,
            process_name: "node".into(),
            start_time_unix: 1_700_000_000,
        };
        write(dir.path(), &state).unwrap();
        let loaded = read(dir.path(), "svc1").unwrap();
        assert_eq!(loaded.process_id, 4242);
        assert_eq!(loaded.process_name, "node");
    }

    #[test]
    fn read_missing_returns_none() {
        let dir = tempdir().unwrap();
        assert!(read(dir.path(), "nope").is_none());
    }

    #[test]
    fn resolve_root_cli_flag_wins() {
        assert_eq!(
            resolve_root(Some("/tmp/explicit")),
            PathBuf::from("/tmp/explicit")
        );
    }
}
