//! Typed error kinds for controller operations (start/stop/check).
//!
//! These never cross the `ServiceController` boundary as `Err` values —
//! `Start`/`Stop`/`Check` report status via state and booleans, per the
//! propagation policy. The enum exists so a single operation's internal
//! `?`-chaining has one error type, and so `EventSink`/`Tracer` calls can
//! match on kind.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("extraction error for {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    #[error("spawn error for {file_name}: {reason}")]
    Spawn { file_name: String, reason: String },

    #[error("process exited early (within start-wait) with status {exit_status}")]
    EarlyExit { exit_status: String },

    #[error("stop error: {0}")]
    Stop(String),
}
