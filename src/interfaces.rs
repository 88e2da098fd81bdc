//! Trait-shaped seams for the collaborators the core treats as external:
//! configuration pull, event logging, performance reporting, and tracing.
//! None of these own any real infrastructure here — the core only needs
//! the interface, per the scope boundary in §1.

use crate::service_info::{DeployInfo, ServiceInfo};
use crate::SupervisorError;

/// Pulls the current service catalog. The Supervisor diffs the returned
/// list against its live controller set on every sync (§4.5).
pub trait ConfigClient: Send + Sync {
    fn fetch(&self) -> Result<Vec<(ServiceInfo, Option<DeployInfo>)>, SupervisorError>;
}

/// Process metrics sampled after a `Check` tick and forwarded upstream.
#[derive(Debug, Clone)]
pub struct AppMetrics {
    pub process_name: String,
    pub pid: u32,
    pub working_set_mib: u64,
    pub cpu_percent: f32,
    pub thread_count: usize,
    pub handle_count: u64,
    pub uptime_secs: u64,
}

/// Receives periodic process metrics. Reporting is best-effort: a
/// `PerfReporter` must never block or panic the `Check` tick that calls it.
pub trait PerfReporter: Send + Sync {
    fn report_app_ping(&self, metrics: AppMetrics);
}

/// Two-level event log: info and error. `write_log` is the routing
/// convenience described in §6 — messages containing "错误" or "失败" go
/// to `write_error`, everything else to `write_info`.
pub trait EventSink: Send + Sync {
    fn write_info(&self, source: &str, message: &str);
    fn write_error(&self, source: &str, message: &str);

    fn write_log(&self, source: &str, message: &str) {
        if message.contains("错误") || message.contains("失败") {
            self.write_error(source, message);
        } else {
            self.write_info(source, message);
        }
    }
}

/// A single span in a hierarchical trace. Dropping a span without calling
/// `set_error` records it as successful; callers that hit an error path
/// must call `set_error` before the span is dropped.
pub trait Span {
    fn append_tag(&mut self, s: &str);
    fn set_error(&mut self, err: &str);
}

/// Creates spans wrapping Start, Stop, Check, adoption, and file-change
/// events.
pub trait Tracer: Send + Sync {
    fn new_span(&self, name: &str, tag: &str) -> Box<dyn Span>;
}

/// No-op implementations used as defaults where the host application has
/// not wired a real upstream collaborator (e.g. in tests, or a minimal
/// deployment with telemetry disabled).
pub struct NullPerfReporter;

impl PerfReporter for NullPerfReporter {
    fn report_app_ping(&self, _metrics: AppMetrics) {}
}

pub struct NullSpan;

impl Span for NullSpan {
    fn append_tag(&mut self, _s: &str) {}
    fn set_error(&mut self, _err: &str) {}
}

pub struct NullTracer;

impl Tracer for NullTracer {
    fn new_span(&self, _name: &str, _tag: &str) -> Box<dyn Span> {
        Box::new(NullSpan)
    }
}

/// `EventSink` implementation that forwards to `tracing`, matching how the
/// rest of the crate logs.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn write_info(&self, source: &str, message: &str) {
        tracing::info!(source, "{}", message);
    }

    fn write_error(&self, source: &str, message: &str) {
        tracing::error!(source, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        infos: std::sync::Mutex<Vec<String>>,
        errors: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                infos: std::sync::Mutex::new(Vec::new()),
                errors: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl EventSink for RecordingSink {
        fn write_info(&self, _source: &str, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }
        fn write_error(&self, _source: &str, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn write_log_routes_chinese_failure_substrings_to_error() {
        let sink = RecordingSink::new();
        sink.write_log("ServiceController", "内存超限：错误");
        sink.write_log("ServiceController", "启动失败");
        sink.write_log("ServiceController", "started cleanly");
        assert_eq!(sink.errors.lock().unwrap().len(), 2);
        assert_eq!(sink.infos.lock().unwrap().len(), 1);
    }
}
