//! Polls a workdir for changes among `{dll, exe, zip, jar}` files and emits
//! a single debounced restart signal per change burst (C3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

const WATCHED_EXTENSIONS: [&str; 4] = ["dll", "exe", "zip", "jar"];
const DEFAULT_PERIOD_MS: u64 = 5_000;
const ACCELERATED_PERIOD_MS: u64 = 1_000;
const DEFAULT_DEBOUNCE_MS: u64 = 3_000;

/// Scans `dir` recursively for files with a watched extension, returning
/// their path and mtime truncated to whole seconds.
pub fn scan(dir: &Path) -> HashMap<PathBuf, u64> {
    let mut stamps = HashMap::new();
    scan_into(dir, &mut stamps);
    stamps
}

fn scan_into(dir: &Path, stamps: &mut HashMap<PathBuf, u64>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_into(&path, stamps);
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !WATCHED_EXTENSIONS.contains(&ext) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(modified) = meta.modified() {
                let secs = modified
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                stamps.insert(path, secs);
            }
        }
    }
}

/// One tick's result: whether anything changed relative to `previous`, and
/// the refreshed stamp map to carry forward.
pub struct ScanDiff {
    pub changed: bool,
    pub stamps: HashMap<PathBuf, u64>,
}

/// Compares a fresh scan against the previously recorded stamps. A path
/// that is new, or whose mtime advanced, counts as a change. Shrinkage
/// (a file disappearing) is not itself a change signal — a new file
/// replacing it is.
pub fn diff(previous: &HashMap<PathBuf, u64>, dir: &Path) -> ScanDiff {
    let fresh = scan(dir);
    let mut changed = false;
    for (path, secs) in &fresh {
        match previous.get(path) {
            None => changed = true,
            Some(prev_secs) if secs > prev_secs => changed = true,
            _ => {}
        }
    }
    ScanDiff {
        changed,
        stamps: fresh,
    }
}

/// Runs the poll/debounce loop on its own thread until `stop` is called.
/// `on_change_detected`/`on_settled` each run on their own freshly spawned
/// thread (never inline on the watcher's own thread — see `start`'s doc);
/// the controller wires these to its own `Stop` then `Start`.
pub struct FileWatcher {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    stamps: Arc<Mutex<HashMap<PathBuf, u64>>>,
}

impl FileWatcher {
    /// `on_change_detected` fires the tick a change is first observed
    /// (the controller's `Stop(reason)`); `on_settled` fires once the
    /// debounce window has elapsed with no further changes (the
    /// controller's `Start()`). Both callbacks typically re-enter
    /// `install_watcher`, which replaces and stops *this* `FileWatcher` —
    /// so `run_loop` always fires them on a freshly spawned thread rather
    /// than inline, or `FileWatcher::stop`'s `JoinHandle::join` would be a
    /// thread trying to join itself.
    pub fn start(
        dir: PathBuf,
        initial_stamps: HashMap<PathBuf, u64>,
        on_change_detected: impl Fn() + Send + Sync + 'static,
        on_settled: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let wake = Arc::new((Mutex::new(false), Condvar::new()));
        let stamps = Arc::new(Mutex::new(initial_stamps.clone()));

        let thread_stop = Arc::clone(&stop_flag);
        let thread_wake = Arc::clone(&wake);
        let thread_stamps = Arc::clone(&stamps);
        let handle = std::thread::spawn(move || {
            run_loop(
                dir,
                initial_stamps,
                thread_stop,
                thread_wake,
                thread_stamps,
                on_change_detected,
                on_settled,
            );
        });

        FileWatcher {
            stop_flag,
            wake,
            handle: Some(handle),
            stamps,
        }
    }

    /// Returns the most recently scanned stamp map, so a controller that
    /// replaces this watcher (e.g. on `SetInfo`, not on a file-change
    /// restart) can seed the new one from here instead of re-scanning —
    /// honoring the monotonicity invariant across watcher reinstalls.
    pub fn current_stamps(&self) -> HashMap<PathBuf, u64> {
        self.stamps.lock().unwrap().clone()
    }

    /// Signals the watcher thread to stop and joins it. Mirrors `Stop`'s
    /// "dispose the FileWatcher timer" requirement (§4.4).
    pub fn stop(mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.wake;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.wake;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    dir: PathBuf,
    initial_stamps: HashMap<PathBuf, u64>,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    shared_stamps: Arc<Mutex<HashMap<PathBuf, u64>>>,
    on_change_detected: impl Fn() + Send + Sync + 'static,
    on_settled: impl Fn() + Send + Sync + 'static,
) {
    let on_change_detected = Arc::new(on_change_detected);
    let on_settled = Arc::new(on_settled);

    // First tick seeds stamps without emitting a restart (bootstrap).
    let mut stamps = initial_stamps;
    let mut ready = false;
    let mut ready_time: Option<Instant> = None;

    loop {
        let period = if ready {
            ACCELERATED_PERIOD_MS
        } else {
            DEFAULT_PERIOD_MS
        };
        if wait_or_stop(&stop_flag, &wake, Duration::from_millis(period)) {
            return;
        }

        let result = diff(&stamps, &dir);
        stamps = result.stamps;
        *shared_stamps.lock().unwrap() = stamps.clone();

        if result.changed {
            if !ready {
                let cb = Arc::clone(&on_change_detected);
                std::thread::spawn(move || cb());
            }
            ready = true;
            ready_time = Some(Instant::now());
        }

        if ready {
            if let Some(t) = ready_time {
                if t.elapsed() >= Duration::from_millis(DEFAULT_DEBOUNCE_MS) {
                    let cb = Arc::clone(&on_settled);
                    std::thread::spawn(move || cb());
                    ready = false;
                    ready_time = None;
                }
            }
        }
    }
}

/// Sleeps for `timeout`, waking early (and returning `true`) if `stop` was
/// requested meanwhile. Checks the shared flag before waiting so a
/// `stop()` that arrives between two ticks (before this call starts
/// waiting on the condvar) isn't missed until the full `timeout` elapses.
fn wait_or_stop(stop_flag: &AtomicBool, wake: &(Mutex<bool>, Condvar), timeout: Duration) -> bool {
    let (lock, cvar) = wake;
    let guard = lock.lock().unwrap();
    if *guard {
        return true;
    }
    let (_guard, _timeout_result) = cvar.wait_timeout(guard, timeout).unwrap();
    stop_flag.load(Ordering::SeqCst)
}
