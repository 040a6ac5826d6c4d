/// Configuration utilities - loading, reloading, and access helpers
///
/// - Loading configuration from disk (TOML)
/// - Hot-reloading configuration at runtime
/// - Thread-safe access helpers
use super::schemas::Config;
use crate::paths;
use once_cell::sync::OnceCell;
use std::sync::RwLock;

/// Global configuration instance
///
/// Single source of truth for all configuration values. Access it through
/// the helper functions below.
pub static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

/// Load configuration from the default path and initialize the global CONFIG
///
/// Call once at startup. If the config file doesn't exist, defaults from the
/// schema definitions are used.
pub fn load_config() -> Result<(), String> {
    let path = crate::arguments::get_arg_value("--config")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(paths::get_config_path);
    load_config_from_path(&path)
}

/// Load configuration from a specific file path
pub fn load_config_from_path(path: &std::path::Path) -> Result<(), String> {
    let config = read_config_file(path)?;

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(())
}

/// Reload configuration from disk
///
/// Atomically replaces the global config so reads are always consistent.
pub fn reload_config() -> Result<(), String> {
    let path = paths::get_config_path();
    let config = read_config_file(&path)?;

    let lock = CONFIG.get().ok_or("Config not initialized")?;
    *lock.write().map_err(|_| "Config lock poisoned")? = config;

    Ok(())
}

fn read_config_file(path: &std::path::Path) -> Result<Config, String> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        toml::from_str::<Config>(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))
    } else {
        Ok(Config::default())
    }
}

/// Run a closure with read access to the current configuration
///
/// Falls back to defaults if the global config was never initialized
/// (library/test usage).
pub fn with_config<T>(f: impl FnOnce(&Config) -> T) -> T {
    match CONFIG.get() {
        Some(lock) => match lock.read() {
            Ok(config) => f(&config),
            Err(_) => f(&Config::default()),
        },
        None => f(&Config::default()),
    }
}

/// Initialize the global config directly (tests and embedded usage)
pub fn set_config(config: Config) {
    match CONFIG.get() {
        Some(lock) => {
            if let Ok(mut guard) = lock.write() {
                *guard = config;
            }
        }
        None => {
            let _ = CONFIG.set(RwLock::new(config));
        }
    }
}

/// Serializes tests that mutate the global config; the guard must be held
/// for the whole test body.
#[cfg(test)]
pub async fn lock_test_config() -> tokio::sync::MutexGuard<'static, ()> {
    static GUARD: once_cell::sync::Lazy<tokio::sync::Mutex<()>> =
        once_cell::sync::Lazy::new(|| tokio::sync::Mutex::new(()));
    GUARD.lock().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_config_uses_defaults_when_uninitialized() {
        let levels = with_config(|cfg| cfg.broker.priority_levels);
        assert!(levels > 0);
    }
}
