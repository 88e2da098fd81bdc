//! The per-service state machine (C4): binds `ProcessLauncher`,
//! `ArchiveDeployer`, `FileWatcher`, `ProcessTerminator`, and `ProcessTable`
//! behind a single lock, and implements `Start`/`Stop`/`Check`, adoption,
//! and the `MaxFails` backoff described in spec §4.4.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::archive_deployer::ArchiveDeployer;
use crate::error::SupervisorError;
use crate::file_watcher::{self, FileWatcher};
use crate::interfaces::{AppMetrics, EventSink, NullPerfReporter, NullTracer, PerfReporter, Tracer, TracingEventSink};
use crate::persistence;
use crate::process_launcher::{LaunchRequest, ProcessLauncher};
use crate::process_table::{ProcessTable, SysinfoProcessTable};
use crate::process_terminator::{self, ProcessTerminator};
use crate::service_info::{ControllerState, DeployInfo, Mode, OwnedProcess, ServiceInfo};

const CONTROLLER_SOURCE: &str = "ServiceController";
/// `50 x 200ms` graceful, then the same again forceful: `Stop`'s hard-coded
/// 20s total deadline (§9 Open Question 3 — kept as a constant, not config).
const GRACEFUL_STOP_ATTEMPTS: u32 = 50;
const GRACEFUL_STOP_INTERVAL_MS: u64 = 200;

/// Collaborators a `ServiceController` needs; grouped so `Supervisor` can
/// build one set and clone the `Arc`s into every controller it creates.
pub struct ControllerDeps {
    pub process_table: Arc<dyn ProcessTable>,
    pub terminator: Box<dyn ProcessTerminator>,
    pub event_sink: Arc<dyn EventSink>,
    pub perf_reporter: Arc<dyn PerfReporter>,
    pub tracer: Arc<dyn Tracer>,
    /// Root directory for `{name, pid, process_name, start_time}`
    /// persistence (§6). `None` disables persistence entirely, which is
    /// what tests want.
    pub state_root: Option<PathBuf>,
}

impl Default for ControllerDeps {
    fn default() -> Self {
        ControllerDeps {
            process_table: Arc::new(SysinfoProcessTable::new()),
            terminator: process_terminator::default_terminator(),
            event_sink: Arc::new(TracingEventSink),
            perf_reporter: Arc::new(NullPerfReporter),
            tracer: Arc::new(NullTracer),
            state_root: None,
        }
    }
}

pub struct ServiceController {
    name: String,
    state: Mutex<ControllerState>,
    watcher: Mutex<Option<FileWatcher>>,
    process_table: Arc<dyn ProcessTable>,
    terminator: Box<dyn ProcessTerminator>,
    event_sink: Arc<dyn EventSink>,
    perf_reporter: Arc<dyn PerfReporter>,
    tracer: Arc<dyn Tracer>,
    state_root: Option<PathBuf>,
    self_pid: u32,
}

impl ServiceController {
    pub fn new(info: ServiceInfo, deploy_info: Option<DeployInfo>, deps: ControllerDeps) -> Arc<Self> {
        let name = info.name.clone();
        let mut state = ControllerState::new(info, deploy_info);
        if let Some(root) = &deps.state_root {
            if let Some(persisted) = persistence::read(root, &name) {
                state.process_id = Some(persisted.process_id);
                state.process_name = Some(persisted.process_name);
                state.start_time = Some(persistence::from_unix_secs(persisted.start_time_unix));
            }
        }
        Arc::new(ServiceController {
            name,
            state: Mutex::new(state),
            watcher: Mutex::new(None),
            process_table: deps.process_table,
            terminator: deps.terminator,
            event_sink: deps.event_sink,
            perf_reporter: deps.perf_reporter,
            tracer: deps.tracer,
            state_root: deps.state_root,
            self_pid: std::process::id(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> Arc<ServiceInfo> {
        self.state.lock().unwrap().info.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().unwrap().disabled
    }

    pub fn error_count(&self) -> u32 {
        self.state.lock().unwrap().error_count
    }

    pub fn resolved_file_name(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().resolved_file_name.clone()
    }

    pub fn resolved_work_dir(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().resolved_work_dir.clone()
    }

    /// Replaces the controller's `ServiceInfo`. Per §4.4's backoff rule, the
    /// error ceiling resets only when the new `Arc` is a genuinely new
    /// instance — callers (the `Supervisor`) reuse the cached `Arc` on
    /// unchanged config so repeated polling doesn't silently un-stick a
    /// flapping service.
    pub fn set_info(&self, info: Arc<ServiceInfo>, deploy_info: Option<DeployInfo>) {
        let mut state = self.state.lock().unwrap();
        let changed = !Arc::ptr_eq(&state.info, &info);
        state.info = info;
        state.deploy_info = deploy_info;
        if changed {
            state.error_count = 0;
            state.disabled = false;
        }
    }

    /// Attempts Stopped -> Running. Returns true iff it actually started a
    /// new attempt's worth of work (a failed attempt still consumed an
    /// `ErrorCount` increment, so callers checking backoff should prefer
    /// `error_count()`/`is_disabled()` over this return value).
    pub fn start(self: &Arc<Self>) -> bool {
        let mut span = self.tracer.new_span(&self.name, "Start");

        let (info, deploy_info) = {
            let state = self.state.lock().unwrap();
            if state.running || state.disabled {
                return false;
            }
            (state.info.clone(), state.deploy_info.clone())
        };

        if info.file_name.trim().is_empty() {
            self.event_sink.write_error(
                CONTROLLER_SOURCE,
                &format!("{}: config error: FileName is empty", self.name),
            );
            self.state.lock().unwrap().disabled = true;
            span.set_error("config error: empty FileName");
            return false;
        }

        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.error_count += 1;
            state.error_count
        };
        // Second and subsequent attempts capture stdio to diagnose the
        // startup failure, per §4.4.
        let capture_stdio = attempt > 1;

        let launch_result: Result<Option<OwnedProcess>, SupervisorError> = match info.mode {
            Mode::Extract => self.run_extract_only(&info, deploy_info.as_ref()).map(|()| None),
            Mode::ExtractAndRun => self
                .run_extract_and_run(&info, deploy_info.as_ref(), capture_stdio)
                .map(Some),
            Mode::Default | Mode::Multiple | Mode::RunOnce => {
                if info.is_zip_deploy() {
                    self.run_extract_and_run(&info, deploy_info.as_ref(), capture_stdio)
                        .map(Some)
                } else {
                    self.run_direct(&info, capture_stdio).map(Some)
                }
            }
        };

        match launch_result {
            Ok(process_opt) => {
                let is_run_once = matches!(info.mode, Mode::RunOnce);
                let mut state = self.state.lock().unwrap();
                if let Some(process) = process_opt {
                    state.process_id = Some(process.pid);
                    state.process_name = Some(process.process_name.clone());
                    state.process = Some(process);
                }
                state.running = true;
                if state.start_time.is_none() {
                    state.start_time = Some(SystemTime::now());
                }
                if is_run_once {
                    // §3: "On RunOnce success, Info.Enable transitions to
                    // false and Running resets to false." The process keeps
                    // running; the controller simply stops supervising it.
                    state.running = false;
                    state.process = None;
                    let mut disabled_info = (*info).clone();
                    disabled_info.enable = false;
                    state.info = Arc::new(disabled_info);
                }
                drop(state);
                if !is_run_once {
                    self.persist();
                    self.install_watcher(&info);
                }
                self.event_sink
                    .write_info(CONTROLLER_SOURCE, &format!("{}: started", self.name));
                true
            }
            Err(err) => {
                self.event_sink.write_error(
                    CONTROLLER_SOURCE,
                    &format!("{}: start failed: {err}", self.name),
                );
                span.set_error(&err.to_string());
                let mut state = self.state.lock().unwrap();
                if state.error_count >= info.max_fails && !state.disabled {
                    state.disabled = true;
                    drop(state);
                    self.event_sink.write_error(
                        CONTROLLER_SOURCE,
                        &format!(
                            "{}: reached MaxFails ({}); disabled pending new config",
                            self.name, info.max_fails
                        ),
                    );
                }
                false
            }
        }
    }

    fn run_direct(
        &self,
        info: &ServiceInfo,
        capture_stdio: bool,
    ) -> Result<OwnedProcess, SupervisorError> {
        let work_dir = info.working_directory();
        let process = ProcessLauncher::launch(LaunchRequest {
            file_name: &info.file_name,
            argv: &info.argv(),
            work_dir: &work_dir,
            user_name: info.user_name.as_deref(),
            capture_stdio,
        })?;
        self.await_early_exit(process, info.start_wait_ms, capture_stdio, &info.file_name)
    }

    fn run_extract_only(
        &self,
        info: &ServiceInfo,
        deploy_info: Option<&DeployInfo>,
    ) -> Result<(), SupervisorError> {
        let work_dir = info.working_directory();
        std::fs::create_dir_all(&work_dir).map_err(|e| SupervisorError::Extraction {
            archive: PathBuf::from(&info.file_name),
            reason: format!("cannot create work dir: {e}"),
        })?;
        let archive_path = resolve_archive_path(info, &work_dir)?;
        let mut deployer = ArchiveDeployer::new();
        deployer.extract(&archive_path, &work_dir, deploy_info, "")?;
        let mut state = self.state.lock().unwrap();
        state.resolved_work_dir = Some(work_dir);
        state.resolved_file_name = None;
        Ok(())
    }

    fn run_extract_and_run(
        &self,
        info: &ServiceInfo,
        deploy_info: Option<&DeployInfo>,
        capture_stdio: bool,
    ) -> Result<OwnedProcess, SupervisorError> {
        let work_dir = info.working_directory();
        std::fs::create_dir_all(&work_dir).map_err(|e| SupervisorError::Extraction {
            archive: PathBuf::from(&info.file_name),
            reason: format!("cannot create work dir: {e}"),
        })?;
        let archive_path = resolve_archive_path(info, &work_dir)?;
        let args = ArchiveDeployer::parse(&info.argv())?;
        let mut deployer = ArchiveDeployer::new();
        deployer.extract(&archive_path, &work_dir, deploy_info, "")?;
        let exe_path = deployer.find_exe_file(&work_dir, &args)?;
        let (launch_file, launch_argv) = launch_spec_for(&exe_path, &args.remaining);

        let process = ProcessLauncher::launch(LaunchRequest {
            file_name: &launch_file,
            argv: &launch_argv,
            work_dir: &work_dir,
            user_name: info.user_name.as_deref(),
            capture_stdio,
        })?;
        let process = self.await_early_exit(process, info.start_wait_ms, capture_stdio, &launch_file)?;

        let mut state = self.state.lock().unwrap();
        // Invariant: ResolvedFileName points inside the workdir, not the
        // original zip — true here since extraction always targets
        // work_dir itself (version_tag = "").
        state.resolved_file_name = Some(exe_path);
        state.resolved_work_dir = Some(work_dir);
        Ok(process)
    }

    /// Waits up to `start_wait_ms` for an early exit. §8: exiting during
    /// the window — success or failure code alike — fails `Start`;
    /// surviving to the deadline (or `start_wait_ms == 0`, which skips
    /// waiting entirely) succeeds.
    fn await_early_exit(
        &self,
        mut process: OwnedProcess,
        start_wait_ms: u64,
        capture_stdio: bool,
        file_name: &str,
    ) -> Result<OwnedProcess, SupervisorError> {
        if start_wait_ms == 0 {
            return Ok(process);
        }
        let deadline = Instant::now() + Duration::from_millis(start_wait_ms);
        if let Some(child) = process.child.as_mut() {
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        if capture_stdio {
                            if let Some(tail) = read_stderr_tail(child) {
                                self.event_sink.write_error(
                                    CONTROLLER_SOURCE,
                                    &format!("{}: {tail}", self.name),
                                );
                            }
                        }
                        return Err(SupervisorError::EarlyExit {
                            exit_status: status.to_string(),
                        });
                    }
                    Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                    Err(e) => {
                        return Err(SupervisorError::Spawn {
                            file_name: file_name.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }
        Ok(process)
    }

    /// Idempotent. Sequence per §4.4: mark not-running, dispose the file
    /// watcher, graceful signal with a wait window, then a forceful kill
    /// with the same wait window. Never panics or propagates an error —
    /// all failures are logged and swallowed.
    pub fn stop(self: &Arc<Self>, reason: &str) {
        let mut span = self.tracer.new_span(&self.name, "Stop");
        span.append_tag(reason);

        let pid_opt = {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.process.as_ref().map(|p| p.pid)
        };

        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.stop();
        }

        let Some(pid) = pid_opt else {
            self.finish_stop(reason);
            return;
        };

        self.process_table.refresh();
        if !self.process_table.is_alive(pid) {
            self.finish_stop(reason);
            return;
        }

        if let Err(e) = self.terminator.terminate_gracefully(pid) {
            tracing::warn!(pid, error = %e, "graceful terminate failed");
            span.set_error(&e.to_string());
        }
        if self.wait_for_exit(pid) {
            self.finish_stop(reason);
            return;
        }

        if let Err(e) = self.terminator.kill(pid) {
            tracing::warn!(pid, error = %e, "force kill failed");
            span.set_error(&e.to_string());
        }
        self.wait_for_exit(pid);
        self.finish_stop(reason);
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        for _ in 0..GRACEFUL_STOP_ATTEMPTS {
            self.process_table.refresh();
            if !self.process_table.is_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(GRACEFUL_STOP_INTERVAL_MS));
        }
        !self.process_table.is_alive(pid)
    }

    fn finish_stop(&self, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.process = None;
        drop(state);
        self.event_sink
            .write_info(CONTROLLER_SOURCE, &format!("{}: stopped ({reason})", self.name));
    }

    /// The liveness/reconciliation tick (§4.4 `Check`).
    pub fn check(self: &Arc<Self>) {
        let mut span = self.tracer.new_span(&self.name, "Check");
        self.process_table.refresh();

        let info = { self.state.lock().unwrap().info.clone() };
        if !info.enable {
            if self.is_running() {
                self.stop("disabled");
            }
            return;
        }
        if self.state.lock().unwrap().disabled {
            // MaxFails ceiling reached; no-op until SetInfo resets it.
            return;
        }

        if matches!(info.mode, Mode::Extract) {
            // Open Question 1: an Extract-mode controller has no owned
            // process to probe — treat Running=true as durable until the
            // next SetInfo or Stop rather than re-extracting every tick.
            if !self.is_running() {
                self.start();
            }
            return;
        }

        let existing_pid = { self.state.lock().unwrap().process.as_ref().map(|p| p.pid) };
        if let Some(pid) = existing_pid {
            if self.process_table.is_alive(pid) {
                if info.max_memory > 0 {
                    if let Some(working_set) = self.process_table.working_set_mib(pid) {
                        if working_set > info.max_memory {
                            span.append_tag("memory-violation");
                            self.stop("内存超限");
                            return;
                        }
                    }
                }
                self.state.lock().unwrap().error_count = 0;
                self.report_metrics(pid);
                return;
            }
            // Exited since the last tick: release the handle and fall
            // through to adoption/Start below.
            let mut state = self.state.lock().unwrap();
            state.process = None;
            state.running = false;
        }

        let (candidate_pid, candidate_name, mode) = {
            let state = self.state.lock().unwrap();
            (state.process_id, state.process_name.clone(), info.mode)
        };

        if let Some(pid) = candidate_pid {
            if pid != self.self_pid && self.adopt_by_pid(pid, candidate_name.as_deref()) {
                span.append_tag("adopted-by-pid");
                self.report_metrics(pid);
                return;
            }
        }

        if mode != Mode::Multiple {
            if let Some(name) = candidate_name {
                if self.adopt_by_name(&info, &name) {
                    span.append_tag("adopted-by-name");
                    if let Some(pid) = self.state.lock().unwrap().process.as_ref().map(|p| p.pid) {
                        self.report_metrics(pid);
                    }
                    return;
                }
            }
        }

        self.start();
        if let Some(pid) = self.state.lock().unwrap().process.as_ref().map(|p| p.pid) {
            self.report_metrics(pid);
        }
    }

    fn adopt_by_pid(self: &Arc<Self>, pid: u32, expected_name: Option<&str>) -> bool {
        if !self.process_table.is_alive(pid) {
            return false;
        }
        let actual_name = self.process_table.process_name(pid);
        match (expected_name, actual_name.as_deref()) {
            (Some(expected), Some(actual)) if expected == actual => self.finish_adoption(pid, actual),
            _ => false,
        }
    }

    fn adopt_by_name(self: &Arc<Self>, info: &ServiceInfo, expected_name: &str) -> bool {
        if expected_name == "dotnet" || expected_name == "java" {
            let Some(suffix) = self.expected_cmdline_suffix(info, expected_name) else {
                return false;
            };
            let Some(pid) =
                self.process_table
                    .find_by_name_and_cmdline_suffix(expected_name, &suffix, self.self_pid)
            else {
                return false;
            };
            self.finish_adoption(pid, expected_name)
        } else if let Some(pid) = self.process_table.find_by_name(expected_name, self.self_pid) {
            self.finish_adoption(pid, expected_name)
        } else {
            false
        }
    }

    fn expected_cmdline_suffix(&self, info: &ServiceInfo, expected_name: &str) -> Option<String> {
        let ext = if expected_name == "dotnet" { "dll" } else { "jar" };
        let resolved = self.state.lock().unwrap().resolved_file_name.clone();
        if let Some(resolved) = resolved {
            if resolved.extension().and_then(|e| e.to_str()) == Some(ext) {
                return resolved.file_name().map(|n| n.to_string_lossy().to_string());
            }
        }
        info.argv().into_iter().find(|a| a.ends_with(&format!(".{ext}")))
    }

    fn finish_adoption(self: &Arc<Self>, pid: u32, process_name: &str) -> bool {
        if !self.process_table.is_alive(pid) {
            return false;
        }
        let info = {
            let mut state = self.state.lock().unwrap();
            state.process = Some(OwnedProcess::adopted(pid, process_name.to_string()));
            state.process_id = Some(pid);
            state.process_name = Some(process_name.to_string());
            state.running = true;
            if state.start_time.is_none() {
                state.start_time = Some(SystemTime::now());
            }
            state.info.clone()
        };
        self.persist();
        self.install_watcher(&info);
        self.event_sink
            .write_info(CONTROLLER_SOURCE, &format!("{}: adopted pid {pid}", self.name));
        true
    }

    fn report_metrics(&self, pid: u32) {
        let process_name = self.process_table.process_name(pid).unwrap_or_default();
        let working_set_mib = self.process_table.working_set_mib(pid).unwrap_or(0);
        let cpu_percent = self.process_table.cpu_percent(pid).unwrap_or(0.0);
        let start_time = self.state.lock().unwrap().start_time;
        let uptime_secs = start_time
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let (thread_count, handle_count) = process_resource_counts(pid);
        self.perf_reporter.report_app_ping(AppMetrics {
            process_name,
            pid,
            working_set_mib,
            cpu_percent,
            thread_count,
            handle_count,
            uptime_secs,
        });
    }

    fn persist(&self) {
        let Some(root) = &self.state_root else {
            return;
        };
        let (pid, process_name, start_time) = {
            let state = self.state.lock().unwrap();
            (state.process_id, state.process_name.clone(), state.start_time)
        };
        let (Some(pid), Some(process_name)) = (pid, process_name) else {
            return;
        };
        let persisted = persistence::PersistedState {
            name: self.name.clone(),
            process_id: pid,
            process_name,
            start_time_unix: persistence::to_unix_secs(start_time.unwrap_or_else(SystemTime::now)),
        };
        if let Err(e) = persistence::write(root, &persisted) {
            tracing::warn!(service = %self.name, error = %e, "failed to persist controller state");
        }
    }

    /// Installs (replacing any prior) `FileWatcher` on the resolved workdir.
    /// Per the FileStamps monotonicity invariant (§3), a controller that
    /// already has stamps recorded reuses them as the new watcher's
    /// baseline instead of re-scanning — only a brand new controller seeds
    /// via a fresh scan.
    fn install_watcher(self: &Arc<Self>, info: &ServiceInfo) {
        if matches!(info.mode, Mode::Extract) {
            // No owned process to restart; an external host runs it.
            return;
        }
        let dir = {
            let state = self.state.lock().unwrap();
            state
                .resolved_work_dir
                .clone()
                .unwrap_or_else(|| info.working_directory())
        };
        // Capture the outgoing watcher's current stamps before replacing it,
        // so a reinstall that isn't itself a file-change restart (e.g.
        // `SetInfo`) doesn't lose ground already covered and re-fire a
        // spurious restart on the next tick.
        if let Some(old) = self.watcher.lock().unwrap().as_ref() {
            self.state.lock().unwrap().file_stamps = old.current_stamps();
        }
        let initial_stamps = {
            let state = self.state.lock().unwrap();
            if state.file_stamps.is_empty() {
                file_watcher::scan(&dir)
            } else {
                state.file_stamps.clone()
            }
        };

        let weak_stop = Arc::downgrade(self);
        let weak_start = weak_stop.clone();
        let watcher = FileWatcher::start(
            dir,
            initial_stamps,
            move || {
                if let Some(controller) = weak_stop.upgrade() {
                    controller.event_sink.write_info(
                        CONTROLLER_SOURCE,
                        &format!("{}: file changed", controller.name),
                    );
                    controller.stop("file changed");
                }
            },
            move || {
                if let Some(controller) = weak_start.upgrade() {
                    controller.start();
                }
            },
        );

        let mut guard = self.watcher.lock().unwrap();
        if let Some(old) = guard.take() {
            old.stop();
        }
        *guard = Some(watcher);
    }
}

/// `dotnet`/`java` entrypoints can't be executed directly; they need the
/// matching runtime invoked with the entrypoint as an argument. This is the
/// same convention §4.4's adoption-by-name rule assumes when it looks for a
/// `dotnet`/`java` process whose command line ends in `.dll`/`.jar`.
fn launch_spec_for(exe_path: &Path, remaining_argv: &[String]) -> (String, Vec<String>) {
    match exe_path.extension().and_then(|e| e.to_str()) {
        Some("dll") => {
            let mut argv = vec![exe_path.to_string_lossy().into_owned()];
            argv.extend(remaining_argv.iter().cloned());
            ("dotnet".to_string(), argv)
        }
        Some("jar") => {
            let mut argv = vec!["-jar".to_string(), exe_path.to_string_lossy().into_owned()];
            argv.extend(remaining_argv.iter().cloned());
            ("java".to_string(), argv)
        }
        _ => (exe_path.to_string_lossy().into_owned(), remaining_argv.to_vec()),
    }
}

/// Resolves `FileName` to an actual archive path: the literal `"ZipDeploy"`
/// means "the sole `*.zip` already sitting in `work_dir`"; anything ending
/// in `.zip` is used as-is (relative to `work_dir` if not absolute).
fn resolve_archive_path(info: &ServiceInfo, work_dir: &Path) -> Result<PathBuf, SupervisorError> {
    if info.file_name.eq_ignore_ascii_case("ZipDeploy") {
        let mut found = None;
        if let Ok(entries) = std::fs::read_dir(work_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("zip") {
                    if found.is_some() {
                        return Err(SupervisorError::Extraction {
                            archive: work_dir.to_path_buf(),
                            reason: "multiple zip files found for ZipDeploy".into(),
                        });
                    }
                    found = Some(path);
                }
            }
        }
        found.ok_or_else(|| SupervisorError::Extraction {
            archive: work_dir.to_path_buf(),
            reason: "no zip file found for ZipDeploy".into(),
        })
    } else {
        let path = PathBuf::from(&info.file_name);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(work_dir.join(path))
        }
    }
}

fn read_stderr_tail(child: &mut std::process::Child) -> Option<String> {
    use std::io::Read;
    let mut buf = String::new();
    child.stderr.as_mut()?.read_to_string(&mut buf).ok()?;
    Some(buf.chars().rev().take(4096).collect::<Vec<_>>().into_iter().rev().collect())
}

/// Best-effort thread/open-handle counts for `AppMetrics`. `sysinfo` doesn't
/// expose either cross-platform, so this reads `/proc` directly on Linux
/// (the only platform this crate's CI targets) and reports zero elsewhere.
#[cfg(target_os = "linux")]
fn process_resource_counts(pid: u32) -> (usize, u64) {
    let threads = std::fs::read_to_string(format!("/proc/{pid}/status"))
        .ok()
        .and_then(|contents| {
            contents.lines().find_map(|line| {
                line.strip_prefix("Threads:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
        })
        .unwrap_or(0);
    let handles = std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| entries.count() as u64)
        .unwrap_or(0);
    (threads, handles)
}

#[cfg(not(target_os = "linux"))]
fn process_resource_counts(_pid: u32) -> (usize, u64) {
    (0, 0)
}
