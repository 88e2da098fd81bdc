//! Fleet owner (C5): pulls the service catalog from a `ConfigClient`,
//! diffs it against the live controller set, and runs a ticker thread that
//! dispatches `Check` to every controller once per period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::controller::{ControllerDeps, ServiceController};
use crate::interfaces::{ConfigClient, EventSink, PerfReporter, Tracer};
use crate::process_table::ProcessTable;
use crate::process_terminator::ProcessTerminator;
use crate::service_info::{DeployInfo, ServiceInfo};

const CONTROLLER_SOURCE: &str = "Supervisor";
const DEFAULT_TICK_PERIOD_MS: u64 = 5_000;

struct Entry {
    controller: Arc<ServiceController>,
    info: Arc<ServiceInfo>,
}

/// Shared collaborators handed to every controller the `Supervisor`
/// creates. Each controller gets its own `ControllerDeps` built from these
/// (the `ProcessTerminator` isn't `Clone`, so `Supervisor` re-derives one
/// per controller via `terminator_factory`).
pub struct SupervisorDeps {
    pub config_client: Arc<dyn ConfigClient>,
    pub process_table: Arc<dyn ProcessTable>,
    pub terminator_factory: Box<dyn Fn() -> Box<dyn ProcessTerminator> + Send + Sync>,
    pub event_sink: Arc<dyn EventSink>,
    pub perf_reporter: Arc<dyn PerfReporter>,
    pub tracer: Arc<dyn Tracer>,
    pub state_root: Option<std::path::PathBuf>,
    pub tick_period: Duration,
}

impl SupervisorDeps {
    fn controller_deps(&self) -> ControllerDeps {
        ControllerDeps {
            process_table: self.process_table.clone(),
            terminator: (self.terminator_factory)(),
            event_sink: self.event_sink.clone(),
            perf_reporter: self.perf_reporter.clone(),
            tracer: self.tracer.clone(),
            state_root: self.state_root.clone(),
        }
    }
}

impl Default for SupervisorDeps {
    fn default() -> Self {
        SupervisorDeps {
            config_client: Arc::new(crate::config::EmptyConfigClient),
            process_table: Arc::new(crate::process_table::SysinfoProcessTable::new()),
            terminator_factory: Box::new(crate::process_terminator::default_terminator),
            event_sink: Arc::new(crate::interfaces::TracingEventSink),
            perf_reporter: Arc::new(crate::interfaces::NullPerfReporter),
            tracer: Arc::new(crate::interfaces::NullTracer),
            state_root: None,
            tick_period: Duration::from_millis(DEFAULT_TICK_PERIOD_MS),
        }
    }
}

pub struct Supervisor {
    deps: SupervisorDeps,
    controllers: Mutex<HashMap<String, Entry>>,
    stop_flag: Arc<std::sync::atomic::AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(deps: SupervisorDeps) -> Arc<Self> {
        Arc::new(Supervisor {
            deps,
            controllers: Mutex::new(HashMap::new()),
            stop_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            ticker: Mutex::new(None),
        })
    }

    pub fn controller(&self, name: &str) -> Option<Arc<ServiceController>> {
        self.controllers
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.controller.clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.controllers.lock().unwrap().keys().cloned().collect()
    }

    /// Fetches the catalog and reconciles the live controller set against
    /// it (§4.5): new entries get a fresh controller and an immediate
    /// `Start`; removed entries are stopped and dropped; changed entries
    /// get `SetInfo`. Unchanged entries are left alone entirely — no
    /// `SetInfo` call at all, so an unrelated `fetch()` never resets a
    /// controller's backoff state.
    pub fn sync(self: &Arc<Self>) {
        let catalog = match self.deps.config_client.fetch() {
            Ok(catalog) => catalog,
            Err(err) => {
                self.deps.event_sink.write_error(
                    CONTROLLER_SOURCE,
                    &format!("config fetch failed: {err}"),
                );
                return;
            }
        };

        let mut seen = std::collections::HashSet::new();
        let mut controllers = self.controllers.lock().unwrap();

        for (info, deploy_info) in catalog {
            seen.insert(info.name.clone());
            match controllers.get(&info.name) {
                None => {
                    let controller =
                        ServiceController::new(info.clone(), deploy_info, self.deps.controller_deps());
                    self.deps.event_sink.write_info(
                        CONTROLLER_SOURCE,
                        &format!("{}: new service registered", info.name),
                    );
                    let entry = Entry {
                        controller: controller.clone(),
                        info: Arc::new(info),
                    };
                    controllers.insert(entry.info.name.clone(), entry);
                    controller.check();
                }
                Some(existing) if *existing.info != info => {
                    let new_info = Arc::new(info);
                    existing.controller.set_info(new_info.clone(), deploy_info);
                    self.deps.event_sink.write_info(
                        CONTROLLER_SOURCE,
                        &format!("{}: config changed, applied", new_info.name),
                    );
                    let name = new_info.name.clone();
                    let controller = existing.controller.clone();
                    controller.check();
                    controllers.insert(
                        name,
                        Entry {
                            controller,
                            info: new_info,
                        },
                    );
                }
                Some(_) => {
                    // Unchanged — intentionally no SetInfo call.
                }
            }
        }

        let removed: Vec<String> = controllers
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        for name in removed {
            if let Some(entry) = controllers.remove(&name) {
                entry.controller.stop("removed from config");
                self.deps
                    .event_sink
                    .write_info(CONTROLLER_SOURCE, &format!("{name}: removed from config"));
            }
        }
    }

    /// Runs one `Check` per controller, each on its own short-lived thread
    /// so a slow controller can't stall the others (§5).
    pub fn check_all(self: &Arc<Self>) {
        let controllers: Vec<Arc<ServiceController>> = self
            .controllers
            .lock()
            .unwrap()
            .values()
            .map(|e| e.controller.clone())
            .collect();

        let handles: Vec<JoinHandle<()>> = controllers
            .into_iter()
            .map(|controller| std::thread::spawn(move || controller.check()))
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Runs `sync` once followed by one `check_all` pass, without starting
    /// the background ticker. Used for `--once` CLI invocations and tests.
    pub fn run_once(self: &Arc<Self>) {
        self.sync();
        self.check_all();
    }

    /// Starts the background ticker thread: `sync` + `check_all` once per
    /// `tick_period` until `shutdown` is called.
    pub fn start(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let stop_flag = Arc::clone(&self.stop_flag);
        let period = self.deps.tick_period;
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
                supervisor.sync();
                supervisor.check_all();
                std::thread::sleep(period);
            }
        });
        *self.ticker.lock().unwrap() = Some(handle);
    }

    /// Stops the ticker and every controller's owned process.
    pub fn shutdown(self: &Arc<Self>) {
        self.stop_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            let _ = handle.join();
        }
        let controllers: Vec<Arc<ServiceController>> = self
            .controllers
            .lock()
            .unwrap()
            .values()
            .map(|e| e.controller.clone())
            .collect();
        for controller in controllers {
            controller.stop("supervisor shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SupervisorError;
    use crate::process_table::fake::FakeProcessTable;
    use crate::service_info::Mode;
    use std::sync::Mutex as StdMutex;

    struct FakeConfigClient {
        catalog: StdMutex<Vec<(ServiceInfo, Option<DeployInfo>)>>,
    }
    impl FakeConfigClient {
        fn new(catalog: Vec<(ServiceInfo, Option<DeployInfo>)>) -> Arc<Self> {
            Arc::new(FakeConfigClient {
                catalog: StdMutex::new(catalog),
            })
        }
        fn set(&self, catalog: Vec<(ServiceInfo, Option<DeployInfo>)>) {
            *self.catalog.lock().unwrap() = catalog;
        }
    }
    impl ConfigClient for FakeConfigClient {
        fn fetch(&self) -> Result<Vec<(ServiceInfo, Option<DeployInfo>)>, SupervisorError> {
            Ok(self.catalog.lock().unwrap().clone())
        }
    }

    struct NoopEventSink;
    impl EventSink for NoopEventSink {
        fn write_info(&self, _source: &str, _message: &str) {}
        fn write_error(&self, _source: &str, _message: &str) {}
    }

    struct NoopTerminator;
    impl ProcessTerminator for NoopTerminator {
        fn terminate_gracefully(&self, _pid: u32) -> Result<(), SupervisorError> {
            Ok(())
        }
        fn kill(&self, _pid: u32) -> Result<(), SupervisorError> {
            Ok(())
        }
        fn exists(&self, _pid: u32) -> bool {
            false
        }
    }

    fn info(name: &str) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            file_name: String::new(),
            arguments: String::new(),
            working_directory: String::new(),
            user_name: None,
            max_memory: 0,
            mode: Mode::Default,
            enable: true,
            start_wait_ms: 300,
            max_fails: 20,
        }
    }

    fn test_deps(config_client: Arc<dyn ConfigClient>) -> SupervisorDeps {
        SupervisorDeps {
            config_client,
            process_table: Arc::new(FakeProcessTable::new()),
            terminator_factory: Box::new(|| Box::new(NoopTerminator)),
            event_sink: Arc::new(NoopEventSink),
            perf_reporter: Arc::new(crate::interfaces::NullPerfReporter),
            tracer: Arc::new(crate::interfaces::NullTracer),
            state_root: None,
            tick_period: Duration::from_millis(10),
        }
    }

    #[test]
    fn sync_registers_new_services_and_removes_deleted_ones() {
        let client = FakeConfigClient::new(vec![(info("svc-a"), None)]);
        let supervisor = Supervisor::new(test_deps(client.clone() as Arc<dyn ConfigClient>));

        supervisor.sync();
        assert_eq!(supervisor.service_names(), vec!["svc-a".to_string()]);

        client.set(vec![]);
        supervisor.sync();
        assert!(supervisor.service_names().is_empty());
    }

    #[test]
    fn sync_applies_set_info_only_when_content_changed() {
        let mut first = info("svc-a");
        first.max_fails = 5;
        let client = FakeConfigClient::new(vec![(first.clone(), None)]);
        let supervisor = Supervisor::new(test_deps(client.clone() as Arc<dyn ConfigClient>));
        supervisor.sync();

        let controller = supervisor.controller("svc-a").unwrap();
        let info_before = controller.info();

        // Unchanged catalog: re-sync must not replace the Arc.
        supervisor.sync();
        assert!(Arc::ptr_eq(&info_before, &controller.info()));

        // Changed catalog: the Arc is replaced.
        let mut changed = first;
        changed.max_fails = 9;
        client.set(vec![(changed, None)]);
        supervisor.sync();
        assert!(!Arc::ptr_eq(&info_before, &controller.info()));
        assert_eq!(controller.info().max_fails, 9);
    }

    #[test]
    fn run_once_syncs_and_checks_without_panicking() {
        let client = FakeConfigClient::new(vec![(info("svc-a"), None)]);
        let supervisor = Supervisor::new(test_deps(client as Arc<dyn ConfigClient>));
        supervisor.run_once();
        assert_eq!(supervisor.service_names(), vec!["svc-a".to_string()]);
    }
}
