//! Logging setup
//!
//! Installs a `tracing` subscriber writing to stdout and to
//! `~/.voxfill/logs/voxfill-debug.log`, both with local timestamps.
//! `RUST_LOG` overrides the default `info` filter.

use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

/// Format timestamps using the system's local time via chrono
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Default log directory (~/.voxfill/logs)
pub fn default_log_dir() -> PathBuf {
    crate::config::get_config_dir().join("logs")
}

/// Initialise logging into the default log directory
pub fn init_logging() {
    init_logging_in(&default_log_dir());
}

/// Initialise logging into `log_dir`.
///
/// Falls back to stdout only if the log file cannot be opened. A subscriber
/// that is already installed is left alone.
pub fn init_logging_in(log_dir: &Path) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let _ = std::fs::create_dir_all(log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("voxfill-debug.log"))
        .ok();

    let installed = if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(filter())
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_timer(LocalTimer)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!("Logging initialised (log dir: {})", log_dir.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_under_config_dir() {
        let dir = default_log_dir();
        assert!(dir.ends_with("logs"));
        assert!(dir.to_string_lossy().contains(".voxfill"));
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let dir = tempfile::TempDir::new().unwrap();
        init_logging_in(dir.path());
        init_logging_in(dir.path());
        assert!(dir.path().join("voxfill-debug.log").exists());
    }
}
