//! svc-supervisor v0.1 — entry point
//!
//! Deliberately small CLI surface: a single `run` subcommand reads a TOML
//! catalog and either drives the supervisor loop forever or, with `--once`,
//! performs a single sync-then-check pass and exits. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use svc_supervisor::config::FileConfigClient;
use svc_supervisor::interfaces::{NullPerfReporter, NullTracer, TracingEventSink};
use svc_supervisor::supervisor::{Supervisor, SupervisorDeps};

#[derive(Debug, Parser)]
#[command(name = "svc-supervisor")]
#[command(about = "Host-resident application supervisor", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a service catalog and supervise it.
    Run {
        /// Path to the TOML catalog ([[service]] entries).
        #[arg(long)]
        config: String,

        /// Directory used to persist adoption state across restarts.
        #[arg(long)]
        state_root: Option<String>,

        /// Milliseconds between ticks of the supervisor loop.
        #[arg(long, default_value = "5000")]
        tick_ms: u64,

        /// Run a single sync+check pass and exit, instead of looping forever.
        #[arg(long)]
        once: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            config,
            state_root,
            tick_ms,
            once,
        } => {
            let config_client = std::sync::Arc::new(FileConfigClient::new(config.clone()));
            let deps = SupervisorDeps {
                config_client,
                event_sink: std::sync::Arc::new(TracingEventSink),
                perf_reporter: std::sync::Arc::new(NullPerfReporter),
                tracer: std::sync::Arc::new(NullTracer),
                state_root: state_root.map(std::path::PathBuf::from),
                tick_period: std::time::Duration::from_millis(tick_ms),
                ..SupervisorDeps::default()
            };

            let supervisor = Supervisor::new(deps);
            if once {
                supervisor.run_once();
            } else {
                supervisor.start();
                wait_for_shutdown_signal().context("waiting for shutdown signal")?;
                supervisor.shutdown();
            }
        }
    }
    Ok(())
}

/// Blocks until SIGINT/SIGTERM (Unix) or Ctrl-C (Windows), so the supervisor
/// has a chance to stop owned child processes cleanly before the binary
/// exits.
#[cfg(unix)]
fn wait_for_shutdown_signal() -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};

    static SIGNALLED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_signal(_sig: libc::c_int) {
        SIGNALLED.store(true, Ordering::SeqCst);
    }

    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: `on_signal` only writes an atomic flag, safe from a
        // signal handler context.
        unsafe {
            if libc::signal(sig, on_signal as libc::sighandler_t) == libc::SIG_ERR {
                anyhow::bail!("failed to install signal handler for {sig}");
            }
        }
    }

    while !SIGNALLED.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    Ok(())
}

#[cfg(windows)]
fn wait_for_shutdown_signal() -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use windows::Win32::Foundation::BOOL;
    use windows::Win32::System::Console::SetConsoleCtrlHandler;

    static SIGNALLED: AtomicBool = AtomicBool::new(false);

    unsafe extern "system" fn handler(_ctrl_type: u32) -> BOOL {
        SIGNALLED.store(true, Ordering::SeqCst);
        true.into()
    }

    unsafe {
        SetConsoleCtrlHandler(Some(handler), true)
            .context("registering console control handler")?;
    }
    while !SIGNALLED.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    Ok(())
}
