//! Logging setup for programs and test harnesses using the connector.
//!
//! The connector itself only emits `tracing` events; these helpers install a
//! subscriber that writes them to stderr or to a log file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Builds the filter from `RUST_LOG`, defaulting to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to stderr.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_stderr_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init();
}

/// Initializes logging to the default log file (see [`get_log_path`]).
pub fn init_file_logging() {
    init_file_logging_at(&get_log_path());
}

/// Initializes logging to the given file, truncating it first.
///
/// Falls back to no logging if the file cannot be created.
pub fn init_file_logging_at(log_path: &Path) {
    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            return;
        }
    }

    let log_file = match File::create(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {e}");
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .try_init();
}

/// Returns the path for the log file.
///
/// Uses XDG state directory on Linux (`~/.local/state/snowflake-connector/connector.log`),
/// or falls back to config directory on other platforms.
pub fn get_log_path() -> PathBuf {
    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("snowflake-connector").join("connector.log");
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("snowflake-connector").join("connector.log");
    }

    std::env::temp_dir().join("snowflake-connector.log")
}
