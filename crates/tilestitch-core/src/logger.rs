//! Stderr logging for stitching jobs.
//!
//! Lines look like `[   1.204s  INFO registrar] 2 of 12 candidate pairs could not be registered`:
//! seconds since install, level, and the last segment of the module path.
//! Jobs log stage timings at `info` and per-pair details at `debug`/`trace`.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that overrides the level given to [`init_with_level`].
pub const LOG_ENV: &str = "TILESTITCH_LOG";

struct JobLogger {
    level: LevelFilter,
    started: Instant,
}

fn short_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

impl Log for JobLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{:8.3}s {:>5} {}] {}\n",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            short_target(record.target()),
            record.args()
        );
        // One write per line keeps lines from parallel workers intact.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<JobLogger> = OnceLock::new();

/// Level from [`LOG_ENV`] if it is set and parses, else `fallback`.
pub fn level_from_env(fallback: LevelFilter) -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Install the stderr logger. [`LOG_ENV`] takes precedence over `level`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let level = level_from_env(level);
    let logger = LOGGER.get_or_init(|| JobLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Span close events carry busy/idle timings for the instrumented stages
/// (`run_pipeline`, `register_all`, `spanning_tree`, `solve`, `assemble`).
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
