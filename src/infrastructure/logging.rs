use anyhow::Context;
use std::fs;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Configuration for console and file logging
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub max_files: usize,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            max_files: 30, // Keep 30 days of logs
            enable_console: true,
            enable_file: false,
            log_level: Level::INFO,
        }
    }
}

/// Default directives when `RUST_LOG` is not set.
pub fn default_filter(level: Level) -> String {
    format!("banking_withdrawals={level},tower_http={level},sqlx=warn")
}

/// Installs the global subscriber. The returned guards flush the file
/// writers on drop and must be held for the life of the process.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Vec<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(config.log_level)));

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();
    let mut guards = Vec::new();

    if config.enable_console {
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(true);
        layers.push(Box::new(console_layer));
    }

    if config.enable_file {
        fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Failed to create log directory {}", config.log_dir))?;
        cleanup_old_logs(&config.log_dir, config.max_files)?;

        let error_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "error.log");
        let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);
        guards.push(error_guard);
        let error_layer = fmt::layer()
            .with_writer(error_writer)
            .with_target(false)
            .with_ansi(false)
            .with_filter(tracing_subscriber::filter::LevelFilter::ERROR);
        layers.push(Box::new(error_layer));

        let all_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "withdrawals.log");
        let (all_writer, all_guard) = tracing_appender::non_blocking(all_appender);
        guards.push(all_guard);
        let all_layer = fmt::layer()
            .with_writer(all_writer)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        layers.push(Box::new(all_layer));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guards)
}

/// Removes the oldest `.log` files beyond `max_files`. Returns how many were removed.
pub fn cleanup_old_logs(log_dir: &str, max_files: usize) -> anyhow::Result<usize> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            name.to_str().map(|n| n.contains(".log")).unwrap_or(false)
        })
        .collect();

    if log_files.len() <= max_files {
        return Ok(0);
    }

    // Oldest first
    log_files.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let mut removed = 0;
    for entry in log_files.iter().take(log_files.len() - max_files) {
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_mentions_crate_and_sqlx() {
        let filter = default_filter(Level::DEBUG);
        assert!(filter.contains("banking_withdrawals=DEBUG"));
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_cleanup_old_logs() {
        let dir = std::env::temp_dir().join(format!("withdrawal-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..5 {
            fs::write(dir.join(format!("withdrawals.log.{i}")), "line").unwrap();
        }
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        let removed = cleanup_old_logs(dir.to_str().unwrap(), 2).unwrap();

        assert_eq!(removed, 3);
        assert!(dir.join("notes.txt").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        assert_eq!(cleanup_old_logs("/nonexistent/withdrawal-logs", 1).unwrap(), 0);
    }
}
