//! Data model: `ServiceInfo`, `DeployInfo`, run modes, and the mutable
//! per-controller state they drive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Deployment discipline for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Mode {
    Default,
    Multiple,
    Extract,
    ExtractAndRun,
    RunOnce,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Default
    }
}

/// Declarative description of one managed application. Immutable per
/// revision — a new revision is a new `ServiceInfo` value, never a mutation
/// of this one (see `ControllerState::info` / the backoff-reset rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Unique identifier within the host.
    pub name: String,
    /// Executable path, the literal `"ZipDeploy"`, or a `*.zip` path.
    pub file_name: String,
    /// Command-line string; tokenized by whitespace where needed.
    #[serde(default)]
    pub arguments: String,
    /// Absolute or host-relative; empty means "derive from file_name".
    #[serde(default)]
    pub working_directory: String,
    /// Optional run-as user (Linux only).
    #[serde(default)]
    pub user_name: Option<String>,
    /// Soft memory ceiling in MiB; 0 disables the check.
    #[serde(default)]
    pub max_memory: u64,
    #[serde(default)]
    pub mode: Mode,
    /// When false the controller holds `Stopped` state.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Milliseconds Start waits for an early exit before declaring success.
    #[serde(default = "default_start_wait")]
    pub start_wait_ms: u64,
    /// Consecutive failed starts allowed before the controller is disabled.
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
}

fn default_true() -> bool {
    true
}

fn default_start_wait() -> u64 {
    2_000
}

fn default_max_fails() -> u32 {
    20
}

impl ServiceInfo {
    pub fn working_directory(&self) -> PathBuf {
        if self.working_directory.is_empty() {
            Path::new(&self.file_name)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            PathBuf::from(&self.working_directory)
        }
    }

    pub fn is_zip_deploy(&self) -> bool {
        self.file_name == "ZipDeploy" || self.file_name.to_ascii_lowercase().ends_with(".zip")
    }

    pub fn argv(&self) -> Vec<String> {
        self.arguments
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Optional extraction overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployInfo {
    /// Globs that must be overwritten during extraction; files outside this
    /// set are preserved if their mtime is newer than the archive entry.
    #[serde(default)]
    pub overwrite: Vec<String>,
}

/// A process the controller is tracking, whether spawned by us or adopted.
pub struct OwnedProcess {
    pub pid: u32,
    pub process_name: String,
    /// Present only when we spawned the child ourselves; adopted processes
    /// have no `Child` handle, only a pid (see `ServiceController::adopt_*`).
    pub child: Option<std::process::Child>,
}

impl OwnedProcess {
    pub fn spawned(child: std::process::Child, process_name: String) -> Self {
        let pid = child.id();
        OwnedProcess {
            pid,
            process_name,
            child: Some(child),
        }
    }

    pub fn adopted(pid: u32, process_name: String) -> Self {
        OwnedProcess {
            pid,
            process_name,
            child: None,
        }
    }
}

/// Mutable, per-controller state. Lives behind a lock inside
/// `ServiceController` (see `controller.rs`).
pub struct ControllerState {
    pub info: std::sync::Arc<ServiceInfo>,
    pub deploy_info: Option<DeployInfo>,
    pub running: bool,
    pub process: Option<OwnedProcess>,
    /// Last-known pid/name, independent of `process`. Survives a controller
    /// being re-created from persisted state (`persistence.rs`) after the
    /// supervisor itself restarts, so `Check`'s adoption steps have
    /// something to look for even though `process` starts out empty.
    pub process_id: Option<u32>,
    pub process_name: Option<String>,
    pub start_time: Option<SystemTime>,
    pub error_count: u32,
    pub disabled: bool,
    pub file_stamps: HashMap<PathBuf, u64>,
    pub resolved_file_name: Option<PathBuf>,
    pub resolved_work_dir: Option<PathBuf>,
}

impl ControllerState {
    pub fn new(info: ServiceInfo, deploy_info: Option<DeployInfo>) -> Self {
        ControllerState {
            info: std::sync::Arc::new(info),
            deploy_info,
            running: false,
            process: None,
            process_id: None,
            process_name: None,
            start_time: None,
            error_count: 0,
            disabled: false,
            file_stamps: HashMap::new(),
            resolved_file_name: None,
            resolved_work_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_zip_deploy_recognizes_literal_and_extension() {
        let mut info = ServiceInfo {
            name: "svc".into(),
            file_name: "ZipDeploy".into(),
            arguments: String::new(),
            working_directory: String::new(),
            user_name: None,
            max_memory: 0,
            mode: Mode::Default,
            enable: true,
            start_wait_ms: 2_000,
            max_fails: 20,
        };
        assert!(info.is_zip_deploy());
        info.file_name = "/srv/app/app.ZIP".into();
        assert!(info.is_zip_deploy());
        info.file_name = "/usr/bin/app".into();
        assert!(!info.is_zip_deploy());
    }

    #[test]
    fn working_directory_derives_from_file_name_when_empty() {
        let info = ServiceInfo {
            name: "svc".into(),
            file_name: "/srv/app/app.exe".into(),
            arguments: String::new(),
            working_directory: String::new(),
            user_name: None,
            max_memory: 0,
            mode: Mode::Default,
            enable: true,
            start_wait_ms: 2_000,
            max_fails: 20,
        };
        assert_eq!(info.working_directory(), PathBuf::from("/srv/app"));
    }

    #[test]
    fn argv_splits_on_whitespace() {
        let info = ServiceInfo {
            name: "svc".into(),
            file_name: "app.dll".into(),
            arguments: "--port=80  --verbose".into(),
            working_directory: String::new(),
            user_name: None,
            max_memory: 0,
            mode: Mode::Default,
            enable: true,
            start_wait_ms: 2_000,
            max_fails: 20,
        };
        assert_eq!(info.argv(), vec!["--port=80", "--verbose"]);
    }
}
