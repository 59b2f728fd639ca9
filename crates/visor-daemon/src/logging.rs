//! Logging bootstrap.
//!
//! Production deployments get structured JSON in rolling daily files plus
//! a compact stdout stream for journald; development gets pretty stdout
//! with span events. The filter comes from `RUST_LOG` when set, otherwise
//! from `VISOR_LOG_LEVEL` (default `info`).

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// The non-blocking writer stops flushing once its guard drops, so the
// guard has to live for the whole process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error when the env filter cannot be parsed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let default_level =
        std::env::var("VISOR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_level))?;

    if is_production {
        let log_dir = log_directory();
        std::fs::create_dir_all(&log_dir).ok();

        let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &log_dir,
            "visor-daemon",
        ));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_ansi(false),
            )
            .init();

        let _ = FILE_GUARD.set(guard);
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
            )
            .init();
    }

    Ok(())
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/visor")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "visor")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_non_empty() {
        assert!(!log_directory().as_os_str().is_empty());
    }
}
