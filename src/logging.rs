use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var holding the log filter directives.
pub const LOG_ENV: &str = "DRAMSYNC_LOG";

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under `<data_dir>/logs`, or to stderr when
/// `to_stderr` is set. Keep the returned guard alive until exit so buffered
/// lines get flushed.
pub fn init(data_dir: &Path, to_stderr: bool) -> Result<WorkerGuard> {
  let (writer, guard) = if to_stderr {
    tracing_appender::non_blocking(std::io::stderr())
  } else {
    let dir = data_dir.join("logs");
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "dramsync.log"))
  };

  tracing_subscriber::registry()
    .with(filter())
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(to_stderr),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}
