//! provides logging helpers

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable controlling the console log filter.
pub const LOG_ENV_VAR: &str = "DSS_LOG";

/// Number of rotated log files kept next to the active one.
const MAX_LOG_FILES: usize = 5;

/// Targets whose debug output would drown the operator's own events.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "kube_client", "rustls", "tower"];

/// initiate the global tracing subscriber
///
/// Console output goes to stderr at `INFO` (overridable through [`LOG_ENV_VAR`])
/// so that data printed on stdout stays parseable. Everything down to `DEBUG`
/// additionally lands in a daily rolling file at `log_file`. When the file
/// cannot be created the subscriber falls back to console-only output and no
/// guard is returned.
pub fn init(log_file: &Path) -> Option<WorkerGuard> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let console_layer = layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(env_filter);

    let Some((appender, guard)) = file_writer(log_file) else {
        registry().with(console_layer).init();
        return None;
    };

    let file_filter = NOISY_TARGETS.iter().fold(
        filter::Targets::new().with_default(LevelFilter::DEBUG),
        |targets, target| targets.with_target(*target, LevelFilter::INFO),
    );

    let file_layer = layer()
        .with_writer(appender)
        .with_ansi(false)
        .with_target(true)
        .with_filter(file_filter);

    registry().with(console_layer).with(file_layer).init();
    Some(guard)
}

fn file_writer(
    log_file: &Path,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let (directory, prefix) = split_log_path(log_file)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES)
        .build(directory)
        .map_err(|err| eprintln!("failed to create log file {}: {err}", log_file.display()))
        .ok()?;

    Some(tracing_appender::non_blocking(appender))
}

/// Splits a log file path into the directory holding it and the file name
/// used as the rolling prefix. A bare file name lives in the current directory.
fn split_log_path(log_file: &Path) -> Option<(&Path, &str)> {
    let prefix = log_file.file_name()?.to_str()?;
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some((directory, prefix))
}
