use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// `<cache_dir>/cinelist/logs`.
pub fn log_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("cinelist").join("logs"))
}

/// Install a subscriber writing to a daily rolling file.
///
/// The filter comes from `CINELIST_LOG`, then `RUST_LOG`, then `warn`
/// (`debug` with `--verbose`). Returns the guard that flushes the writer on
/// drop, or `None` when no log directory is available.
pub fn init(verbose: bool) -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if std::fs::create_dir_all(&dir).is_err() {
        return None;
    }

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CINELIST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    let appender = tracing_appender::rolling::daily(dir, "cinelist.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    Some(guard)
}
