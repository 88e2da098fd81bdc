//! Black-box integration tests for the `svc-supervisor` binary.
//!
//! Each test writes a TOML catalog to a temp directory, runs
//! `svc-supervisor run --config <catalog> --state-root <dir> --once`, and
//! inspects the persisted adoption state and any processes left running.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Path to the compiled binary.
fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop(); // remove test binary name
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("svc-supervisor");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Test harness owning an isolated temp directory holding both the catalog
/// and the state root, cleaned up automatically on drop.
struct TestHarness {
    _tmp: tempfile::TempDir,
    dir: PathBuf,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let dir = tmp.path().to_path_buf();
        Self { _tmp: tmp, dir }
    }

    fn write_catalog(&self, toml: &str) -> PathBuf {
        let path = self.dir.join("catalog.toml");
        std::fs::write(&path, toml).expect("write catalog");
        path
    }

    fn state_root(&self) -> PathBuf {
        self.dir.join("state")
    }

    /// Runs `run --config <catalog> --state-root <state> --once` and waits
    /// for it to exit, returning the process status.
    fn run_once(&self, catalog: &PathBuf) -> std::process::ExitStatus {
        Command::new(binary())
            .arg("run")
            .arg("--config")
            .arg(catalog)
            .arg("--state-root")
            .arg(self.state_root())
            .arg("--once")
            .status()
            .expect("spawn svc-supervisor")
    }
}

#[test]
fn once_pass_exits_cleanly_for_an_empty_catalog() {
    let harness = TestHarness::new();
    let catalog = harness.write_catalog("");
    let status = harness.run_once(&catalog);
    assert!(status.success());
}

#[test]
fn once_pass_launches_a_oneshot_service_without_persisting_state() {
    let harness = TestHarness::new();
    let catalog = harness.write_catalog(
        r#"
        [[service]]
        name = "oneshot-echo"
        file_name = "/bin/echo"
        arguments = "hello"
        mode = "RunOnce"
        start_wait_ms = 500
        "#,
    );

    let status = harness.run_once(&catalog);
    assert!(status.success());

    // `/bin/echo` exits almost instantly; give the supervisor's single Check
    // pass a moment to run before inspecting persisted state.
    std::thread::sleep(Duration::from_millis(200));

    // RunOnce disables the service and drops `Running` on success, so
    // there is nothing left for a future restart to adopt: no state file
    // is written for it.
    let state_file = harness.state_root().join("oneshot-echo.json");
    assert!(
        !state_file.exists(),
        "did not expect persisted state at {}",
        state_file.display()
    );
}

#[test]
fn once_pass_persists_adoption_state_for_a_long_running_service() {
    let harness = TestHarness::new();
    let catalog = harness.write_catalog(
        r#"
        [[service]]
        name = "long-runner"
        file_name = "/bin/sleep"
        arguments = "30"
        start_wait_ms = 200
        "#,
    );

    let status = harness.run_once(&catalog);
    assert!(status.success());

    let state_file = harness.state_root().join("long-runner.json");
    assert!(
        state_file.exists(),
        "expected persisted state at {}",
        state_file.display()
    );
    let contents = std::fs::read_to_string(&state_file).expect("read state file");
    assert!(contents.contains("\"process_name\""));
    assert!(contents.contains("\"sleep\""));

    // Clean up the leftover `sleep 30` so it doesn't linger after the test.
    let parsed: serde_json::Value = serde_json::from_str(&contents).expect("parse state file");
    if let Some(pid) = parsed.get("process_id").and_then(|v| v.as_u64()) {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[test]
fn rejects_a_malformed_catalog() {
    let harness = TestHarness::new();
    let catalog = harness.write_catalog("this is not valid toml [[[");
    let status = harness.run_once(&catalog);
    // `sync()` swallows config errors (logs and returns) rather than
    // failing the process, so a single --once pass still exits 0 with
    // nothing registered.
    assert!(status.success());
}

#[test]
fn missing_catalog_file_still_exits_cleanly() {
    let harness = TestHarness::new();
    let missing = harness.dir.join("does-not-exist.toml");
    let status = harness.run_once(&missing);
    assert!(status.success());
}
