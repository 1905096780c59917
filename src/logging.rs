//! Tracing subscriber setup: console layer plus optional daily-rolling
//! file layer.

use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},rooftop=debug,sqlx=warn", config.level))
    });

    // The writer is built once; each branch assembles its own layers so the
    // subscriber stacks stay independently typed.
    let file_writer = config.dir.as_deref().and_then(file_writer);

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
            }))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(file_writer.map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
            }))
            .init();
    }
}

/// Build the non-blocking rolling-file writer.
///
/// `tracing_appender::rolling::daily` panics if it can't create the initial
/// log file, so writability is preflighted first.
fn file_writer(log_dir: &str) -> Option<NonBlocking> {
    if std::fs::create_dir_all(log_dir).is_err() {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        return None;
    }

    let test_path = std::path::Path::new(log_dir).join(".rooftop_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_path);

            let file_appender = tracing_appender::rolling::daily(log_dir, "rooftop.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the guard alive for the process lifetime
            Box::leak(Box::new(guard));

            Some(non_blocking)
        }
        Err(e) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                log_dir, e
            );
            None
        }
    }
}

/// Minimal console-only setup for one-shot CLI commands.
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // The one test in this binary that installs the global subscriber; it
    // exercises the json-plus-file stack end to end.
    #[test]
    fn test_json_config_with_file_layer_initializes() {
        let dir = std::env::temp_dir().join("rooftop_log_test");
        let config = LoggingConfig {
            level: "info".to_string(),
            json: true,
            dir: Some(dir.to_string_lossy().into_owned()),
        };

        init_logging(&config);
        tracing::info!("logging initialized");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_writer_rejects_unwritable_dir() {
        assert!(file_writer("/proc/rooftop-definitely-not-writable").is_none());
    }
}
