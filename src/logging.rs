//! Log sink setup: leveled console output plus a daily-rotating file.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name stem for the rotating log; the appender adds the date suffix.
const LOG_FILE_PREFIX: &str = "skyrelay.log";

/// Installs the global subscriber. The returned guard must be held for the
/// life of the process or buffered file output is lost on exit.
pub fn init(level: &str, log_dir: &Path) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level [{level}]"))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
