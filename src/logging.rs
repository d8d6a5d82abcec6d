//! Logging setup.
//!
//! Events go to systemd's journal on Linux when it is reachable and to a
//! daily log file otherwise. Interactive runs can ask for stderr instead.
//!
//! The level is read from `PANODB_LOG` (`debug`, `info`, `warn`, `error`, or
//! any `EnvFilter` directive) and defaults to `info`.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV_VAR: &str = "PANODB_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Journald on Linux, otherwise a file.
    System,
    Stderr,
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default))
}

pub fn init(target: Target, log_dir: Option<PathBuf>) -> Result<()> {
    if target == Target::Stderr {
        tracing_subscriber::registry()
            .with(env_filter("debug"))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter("info"))
                .with(journald_layer.with_syslog_identifier("panodb".to_string()))
                .try_init()?;

            tracing::debug!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "panodb.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::debug!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("panodb")
        .join("logs")
}
