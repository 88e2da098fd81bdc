//! svc-supervisor — core library
//!
//! Host-resident application supervisor: zip-based deployment, process
//! lifecycle management, file-change-triggered restarts, memory ceilings,
//! and adoption of a still-running process after the supervisor itself
//! restarts. See the module-level docs on `controller` and `supervisor`
//! for the per-service state machine and fleet owner respectively.

pub mod archive_deployer;
pub mod config;
pub mod controller;
pub mod error;
pub mod file_watcher;
pub mod interfaces;
pub mod persistence;
pub mod process_launcher;
pub mod process_table;
pub mod process_terminator;
pub mod service_info;
pub mod supervisor;

pub use error::SupervisorError;
