//! Minimal logger.
//!
//! Prints `[elapsed LEVEL thread] message` to stderr. Undistortion work runs
//! on its own named worker thread, so the thread column tells host-cycle
//! records from worker records. Records from outside the `arcam` crates are
//! capped at `info` so a debug run is not flooded by dependencies.
//!
//! Everything goes to stderr: the CLI prints its run summary on stdout.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::prelude::*;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Target prefix shared by every crate of the workspace.
const OWN_TARGET: &str = "arcam";

fn is_own_target(target: &str) -> bool {
    target.starts_with(OWN_TARGET)
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn level_for(&self, target: &str) -> LevelFilter {
        if is_own_target(target) {
            self.level
        } else {
            self.level.min(LevelFilter::Info)
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let thread = std::thread::current();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{elapsed:8.3}s {:>5} {}] {}",
            record.level(),
            thread.name().unwrap_or("-"),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger; `level` applies to the `arcam` crates.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Default `tracing` directives when `RUST_LOG` is unset.
#[cfg(feature = "tracing")]
fn default_directives(verbose: bool) -> String {
    let own = if verbose { "debug" } else { "info" };
    ["", "_camera", "_core", "_lifecycle"]
        .iter()
        .fold(String::from("info"), |acc, suffix| {
            format!("{acc},{OWN_TARGET}{suffix}={own}")
        })
}

/// Install a `tracing` subscriber writing to stderr, filtered by `RUST_LOG`
/// or, when unset, `info` with the `arcam` crates at `debug` if `verbose`.
///
/// Spans are reported on close, so instrumented lifecycle transitions and
/// remap calls show their duration. Thread names are always recorded so the
/// undistortion worker is distinguishable from the host thread.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let layer = if json {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_names(true)
            .json()
            .flatten_event(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_names(true)
            .with_timer(fmt::time::Uptime::default())
            .boxed()
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
