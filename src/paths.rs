//! Centralized path resolution for AgentBus
//!
//! All file and directory paths are resolved through this module to ensure
//! consistent behavior across execution contexts and platforms.
//!
//! ## Path Strategy
//!
//! Platform-standard application data locations:
//! - **macOS**: `~/Library/Application Support/AgentBus/`
//! - **Windows**: `%LOCALAPPDATA%\AgentBus\`
//! - **Linux**: `$XDG_DATA_HOME/AgentBus/` (fallback `~/.local/share/AgentBus/`)
//!
//! The `AGENTBUS_HOME` environment variable overrides the base directory,
//! which test and multi-instance setups rely on.
//!
//! ## Directory Structure
//!
//! ```text
//! AgentBus/
//! ├── data/
//! │   ├── config.toml
//! │   └── events.db
//! └── logs/
//!     └── agentbus_*.log
//! ```

use once_cell::sync::Lazy;
use std::path::PathBuf;

// =============================================================================
// BASE DIRECTORY RESOLUTION
// =============================================================================

/// Lazy-initialized base directory (thread-safe)
static BASE_DIRECTORY: Lazy<PathBuf> = Lazy::new(resolve_base_directory);

/// Resolves the base directory for all AgentBus data
fn resolve_base_directory() -> PathBuf {
    const APP_DIR: &str = "AgentBus";

    if let Ok(home) = std::env::var("AGENTBUS_HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }

    if let Some(dir) = dirs::data_local_dir() {
        return dir.join(APP_DIR);
    }

    // Last resort: current directory
    PathBuf::from(".").join(APP_DIR)
}

/// Get the base directory
pub fn get_base_directory() -> PathBuf {
    BASE_DIRECTORY.clone()
}

/// Get the data directory (databases, config)
pub fn get_data_directory() -> PathBuf {
    BASE_DIRECTORY.join("data")
}

/// Get the logs directory
pub fn get_logs_directory() -> PathBuf {
    BASE_DIRECTORY.join("logs")
}

// =============================================================================
// FILE PATHS
// =============================================================================

/// Path to the configuration file
pub fn get_config_path() -> PathBuf {
    get_data_directory().join("config.toml")
}

/// Path to the event store database
pub fn get_events_db_path() -> PathBuf {
    get_data_directory().join("events.db")
}

// =============================================================================
// DIRECTORY CREATION
// =============================================================================

/// Ensure all required directories exist
///
/// Must be called before logger initialization (log files need the logs
/// directory).
pub fn ensure_all_directories() -> Result<(), String> {
    for dir in [get_data_directory(), get_logs_directory()] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_base() {
        let base = get_base_directory();
        assert!(get_data_directory().starts_with(&base));
        assert!(get_logs_directory().starts_with(&base));
        assert!(get_events_db_path().starts_with(get_data_directory()));
    }
}
