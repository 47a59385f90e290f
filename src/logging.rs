use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::app_dirs::AppDirs;

/// Route tracing output to a file under the state dir. A TUI owns the
/// terminal, so stdout/stderr are not usable log destinations while the
/// alternate screen is active.
///
/// Returns the log path, or `None` when no state directory could be
/// resolved (logging is then disabled rather than fatal).
pub fn init() -> anyhow::Result<Option<PathBuf>> {
    let Some(path) = AppDirs::log_path() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simplytype=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    Ok(Some(path))
}
