//! Builds and spawns a platform-correct child process invocation.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::SupervisorError;
use crate::service_info::OwnedProcess;

pub struct LaunchRequest<'a> {
    pub file_name: &'a str,
    pub argv: &'a [String],
    pub work_dir: &'a Path,
    pub user_name: Option<&'a str>,
    pub capture_stdio: bool,
}

pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Spawns `file_name argv...` in `work_dir`. On Linux, when `user_name`
    /// is set, first hands ownership of `work_dir` to that user via `chown
    /// -R`; a chown failure is logged and does not prevent the launch.
    pub fn launch(req: LaunchRequest) -> Result<OwnedProcess, SupervisorError> {
        if let Some(user) = req.user_name {
            Self::chown_work_dir(req.work_dir, user);
        }

        let mut command = Command::new(req.file_name);
        command.args(req.argv).current_dir(req.work_dir);
        command.env("BasePath", req.work_dir.to_string_lossy().to_string());

        if req.capture_stdio {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command.stdin(Stdio::null());

        let child = command.spawn().map_err(|e| SupervisorError::Spawn {
            file_name: req.file_name.to_string(),
            reason: e.to_string(),
        })?;

        let process_name = Path::new(req.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| req.file_name.to_string());

        Ok(OwnedProcess::spawned(child, process_name))
    }

    #[cfg(target_os = "linux")]
    fn chown_work_dir(work_dir: &Path, user: &str) {
        let owner = format!("{user}:{user}");
        match Command::new("chown")
            .arg("-R")
            .arg(&owner)
            .arg(work_dir)
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(?work_dir, user, ?status, "chown -R exited non-zero");
            }
            Err(err) => {
                tracing::warn!(?work_dir, user, %err, "failed to invoke chown");
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn chown_work_dir(_work_dir: &Path, _user: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn launch_sets_base_path_env_var_and_spawns() {
        let dir = tempdir().unwrap();
        let argv: Vec<String> = vec!["-c".into(), "echo $BasePath".into()];
        let req = LaunchRequest {
            file_name: "sh",
            argv: &argv,
            work_dir: dir.path(),
            user_name: None,
            capture_stdio: true,
        };
        let mut process = ProcessLauncher::launch(req).unwrap();
        let child = process.child.as_mut().unwrap();
        let status = child.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn launch_fails_for_nonexistent_binary() {
        let dir = tempdir().unwrap();
        let argv: Vec<String> = Vec::new();
        let req = LaunchRequest {
            file_name: "/does/not/exist/at/all",
            argv: &argv,
            work_dir: dir.path(),
            user_name: None,
            capture_stdio: false,
        };
        assert!(matches!(
            ProcessLauncher::launch(req),
            Err(SupervisorError::Spawn { .. })
        ));
    }
}
