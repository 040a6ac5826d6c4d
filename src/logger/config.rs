/// Logger configuration derived from command-line arguments
///
/// Built once at init() from the global CMD_ARGS, then read lock-free on
/// every log call via an RwLock snapshot.
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Runtime logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level threshold (messages above it are dropped)
    pub min_level: LogLevel,

    /// Tags with --debug-<module> enabled
    pub debug_tags: HashSet<String>,

    /// Tags with --verbose-<module> enabled
    pub verbose_tags: HashSet<String>,

    /// If non-empty, only these tags are logged
    pub enabled_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            enabled_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Known module keys that can appear in --debug-<module> / --verbose-<module>
const MODULE_KEYS: &[&str] = &[
    "router",
    "delivery",
    "store",
    "webserver",
    "session",
    "client",
    "system",
    "test",
];

/// Build logger configuration from the global command-line arguments
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    if arguments::is_quiet_enabled() {
        config.min_level = LogLevel::Warning;
    } else if arguments::is_verbose_enabled() {
        config.min_level = LogLevel::Verbose;
    } else {
        // Debug flags raise the threshold so debug lines pass rule 2;
        // per-tag gating still applies in should_log().
        config.min_level = LogLevel::Debug;
    }

    for key in MODULE_KEYS {
        if arguments::has_arg(&format!("--debug-{}", key)) {
            config.debug_tags.insert(key.to_string());
        }
        if arguments::has_arg(&format!("--verbose-{}", key)) {
            config.verbose_tags.insert(key.to_string());
        }
    }

    *LOGGER_CONFIG.write() = config;
}

/// Snapshot of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Whether --debug-<module> is active for this tag
pub fn is_debug_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().debug_tags.contains(&tag.to_debug_key())
}

/// Whether --verbose-<module> is active for this tag
pub fn is_verbose_enabled_for_tag(tag: &LogTag) -> bool {
    LOGGER_CONFIG.read().verbose_tags.contains(&tag.to_debug_key())
}
