//! Process enumeration and memory-query abstraction, so `ServiceController`
//! can be exercised in tests without touching real OS process state (per
//! the §9 redesign flag on injectable process enumeration).

use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

pub trait ProcessTable: Send + Sync {
    /// Re-samples the underlying process list. Cheap to call once per
    /// `Check` tick; the real implementation wraps a `sysinfo::System`.
    fn refresh(&self);
    fn is_alive(&self, pid: u32) -> bool;
    fn process_name(&self, pid: u32) -> Option<String>;
    fn working_set_mib(&self, pid: u32) -> Option<u64>;
    /// CPU usage percent since the last `refresh`, `sysinfo`'s own sampling
    /// convention (needs two refreshes spaced apart to be meaningful).
    fn cpu_percent(&self, pid: u32) -> Option<f32>;
    /// First process (other than `exclude_pid`) whose name matches.
    fn find_by_name(&self, name: &str, exclude_pid: u32) -> Option<u32>;
    /// First process named `name` (other than `exclude_pid`) whose
    /// command-line arguments contain one ending in `suffix` — the
    /// dotnet/java matching rule in §4.4.
    fn find_by_name_and_cmdline_suffix(
        &self,
        name: &str,
        suffix: &str,
        exclude_pid: u32,
    ) -> Option<u32>;
}

pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        SysinfoProcessTable {
            system: Mutex::new(System::new_all()),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn refresh(&self) {
        self.system
            .lock()
            .unwrap()
            .refresh_processes(ProcessesToUpdate::All, true);
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.system.lock().unwrap().process(Pid::from_u32(pid)).is_some()
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.system
            .lock()
            .unwrap()
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().to_string())
    }

    fn working_set_mib(&self, pid: u32) -> Option<u64> {
        self.system
            .lock()
            .unwrap()
            .process(Pid::from_u32(pid))
            .map(|p| p.memory() / (1024 * 1024))
    }

    fn cpu_percent(&self, pid: u32) -> Option<f32> {
        self.system
            .lock()
            .unwrap()
            .process(Pid::from_u32(pid))
            .map(|p| p.cpu_usage())
    }

    fn find_by_name(&self, name: &str, exclude_pid: u32) -> Option<u32> {
        let system = self.system.lock().unwrap();
        system
            .processes()
            .iter()
            .find(|(pid, proc_)| {
                pid.as_u32() != exclude_pid && proc_.name().to_string_lossy() == name
            })
            .map(|(pid, _)| pid.as_u32())
    }

    fn find_by_name_and_cmdline_suffix(
        &self,
        name: &str,
        suffix: &str,
        exclude_pid: u32,
    ) -> Option<u32> {
        let system = self.system.lock().unwrap();
        system
            .processes()
            .iter()
            .find(|(pid, proc_)| {
                pid.as_u32() != exclude_pid
                    && proc_.name().to_string_lossy() == name
                    && proc_
                        .cmd()
                        .iter()
                        .any(|arg| arg.to_string_lossy().ends_with(suffix))
            })
            .map(|(pid, _)| pid.as_u32())
    }
}

#[cfg(test)]
pub mod fake {
    use super::ProcessTable;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub struct FakeProcess {
        pub name: String,
        pub cmdline: Vec<String>,
        pub working_set_mib: u64,
    }

    pub struct FakeProcessTable {
        processes: Mutex<HashMap<u32, FakeProcess>>,
    }

    impl FakeProcessTable {
        pub fn new() -> Self {
            FakeProcessTable {
                processes: Mutex::new(HashMap::new()),
            }
        }

        pub fn insert(&self, pid: u32, process: FakeProcess) {
            self.processes.lock().unwrap().insert(pid, process);
        }

        pub fn remove(&self, pid: u32) {
            self.processes.lock().unwrap().remove(&pid);
        }

        pub fn set_working_set(&self, pid: u32, mib: u64) {
            if let Some(p) = self.processes.lock().unwrap().get_mut(&pid) {
                p.working_set_mib = mib;
            }
        }
    }

    impl ProcessTable for FakeProcessTable {
        fn refresh(&self) {}

        fn is_alive(&self, pid: u32) -> bool {
            self.processes.lock().unwrap().contains_key(&pid)
        }

        fn process_name(&self, pid: u32) -> Option<String> {
            self.processes.lock().unwrap().get(&pid).map(|p| p.name.clone())
        }

        fn working_set_mib(&self, pid: u32) -> Option<u64> {
            self.processes.lock().unwrap().get(&pid).map(|p| p.working_set_mib)
        }

        fn cpu_percent(&self, pid: u32) -> Option<f32> {
            self.processes.lock().unwrap().get(&pid).map(|_| 0.0)
        }

        fn find_by_name(&self, name: &str, exclude_pid: u32) -> Option<u32> {
            self.processes
                .lock()
                .unwrap()
                .iter()
                .find(|(&pid, p)| pid != exclude_pid && p.name == name)
                .map(|(&pid, _)| pid)
        }

        fn find_by_name_and_cmdline_suffix(
            &self,
            name: &str,
            suffix: &str,
            exclude_pid: u32,
        ) -> Option<u32> {
            self.processes
                .lock()
                .unwrap()
                .iter()
                .find(|(&pid, p)| {
                    pid != exclude_pid
                        && p.name == name
                        && p.cmdline.iter().any(|arg| arg.ends_with(suffix))
                })
                .map(|(&pid, _)| pid)
        }
    }
}
