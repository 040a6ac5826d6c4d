//! Structured logging system for AgentBus
//!
//! This module provides a clean, ergonomic logging API with:
//! - Automatic debug mode filtering from command-line arguments
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Dual output: colored console + file persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agentbus::logger::{self, LogTag};
//!
//! logger::error(LogTag::Store, "Append failed");
//! logger::warning(LogTag::Delivery, "Ack overdue, retrying");
//! logger::info(LogTag::Router, "Event accepted");
//! logger::debug(LogTag::Webserver, "Frame details: ..."); // Only if --debug-webserver
//! ```
//!
//! ## Initialization
//!
//! Call once at startup, after `paths::ensure_all_directories()`:
//! ```rust,ignore
//! logger::init();
//! ```

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

// Re-export public types
pub use config::{get_logger_config, init_from_args, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// This must be called once at application startup, before any logging occurs.
/// It will:
/// 1. Parse command-line arguments for debug flags
/// 2. Configure per-module debug modes
/// 3. Initialize file logging
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics)
///
/// Debug logs are ONLY shown when the --debug-<module> flag for the tag is
/// provided.
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Stage-style logging used throughout the codebase: the stage string doubles
/// as the log type column ("READY", "SUBSCRIBE", "RETRY", ...). Level is
/// inferred from well-known stage names, defaulting to Info.
pub fn log(tag: LogTag, log_type: &str, message: &str) {
    let level = match log_type.to_uppercase().as_str() {
        "ERROR" | "FATAL" => LogLevel::Error,
        "WARN" | "WARNING" => LogLevel::Warning,
        "DEBUG" => LogLevel::Debug,
        "VERBOSE" | "TRACE" => LogLevel::Verbose,
        _ => LogLevel::Info,
    };
    core::log_typed(tag, level, log_type, message);
}

/// Force flush all pending log writes
///
/// Call this during shutdown to ensure all logs are written to disk.
pub fn flush() {
    file::flush_file_logging();
}
