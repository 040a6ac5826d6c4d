/// Centralized argument handling system for AgentBus
///
/// This module consolidates all command-line argument parsing and debug flag
/// checking so binaries and tests resolve flags the same way.
///
/// Features:
/// - Centralized CMD_ARGS storage with thread-safe access
/// - Debug flag checking functions for all modules
/// - Unified argument parsing utilities
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
/// Thread-safe singleton that stores arguments for access throughout the application
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
/// Used by tests to override the default env::args() collection
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
/// Returns a vector clone to avoid holding the mutex lock
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => {
            // Fallback to env::args if mutex is poisoned
            env::args().collect()
        }
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
/// Returns None if the flag is not found or has no value
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    for (i, arg) in args.iter().enumerate() {
        if arg == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

// =============================================================================
// DEBUG FLAG CHECKING FUNCTIONS
// These functions check for specific debug flags in the command-line arguments
// =============================================================================

/// Router core debug mode (publish path, matching, queueing)
pub fn is_debug_router_enabled() -> bool {
    has_arg("--debug-router")
}

/// Delivery engine debug mode (attempts, retries, acks)
pub fn is_debug_delivery_enabled() -> bool {
    has_arg("--debug-delivery")
}

/// Event store debug mode (appends, range reads, maintenance)
pub fn is_debug_store_enabled() -> bool {
    has_arg("--debug-store")
}

/// Webserver debug mode (HTTP routes, WebSocket hub)
pub fn is_debug_webserver_enabled() -> bool {
    has_arg("--debug-webserver")
}

/// Client SDK debug mode (reconnection, local queue, dispatch)
pub fn is_debug_client_enabled() -> bool {
    has_arg("--debug-client")
}

/// Session management debug mode (handshakes, janitor sweeps)
pub fn is_debug_session_enabled() -> bool {
    has_arg("--debug-session")
}

/// Global verbose mode
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Quiet mode (warnings and errors only)
pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet")
}

// =============================================================================
// COMMON PATTERNS
// =============================================================================

pub mod patterns {
    use super::has_arg;

    /// Check if help was requested
    pub fn is_help_requested() -> bool {
        has_arg("--help") || has_arg("-h")
    }
}

/// Print active debug modes at startup
pub fn print_debug_info() {
    let flags = [
        ("--debug-router", is_debug_router_enabled()),
        ("--debug-delivery", is_debug_delivery_enabled()),
        ("--debug-store", is_debug_store_enabled()),
        ("--debug-webserver", is_debug_webserver_enabled()),
        ("--debug-client", is_debug_client_enabled()),
        ("--debug-session", is_debug_session_enabled()),
        ("--verbose", is_verbose_enabled()),
    ];

    let active: Vec<&str> = flags
        .iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| *name)
        .collect();

    if !active.is_empty() {
        println!("Debug modes active: {}", active.join(", "));
    }
}

/// Print help text for the agentbus binary
pub fn print_help() {
    println!("AgentBus - event routing broker for agent processes");
    println!();
    println!("USAGE:");
    println!("    agentbus [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>        Path to config.toml (default: data/config.toml)");
    println!("    --quiet                Only show warnings and errors");
    println!("    --verbose              Show verbose trace output");
    println!("    --debug-router         Debug the publish/match/queue path");
    println!("    --debug-delivery       Debug delivery attempts and retries");
    println!("    --debug-store          Debug event store operations");
    println!("    --debug-webserver      Debug HTTP routes and the WebSocket hub");
    println!("    --debug-client         Debug the client SDK");
    println!("    --debug-session        Debug session lifecycle");
    println!("    -h, --help             Print this help text");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_lookup() {
        set_cmd_args(vec![
            "agentbus".to_string(),
            "--config".to_string(),
            "/tmp/custom.toml".to_string(),
            "--debug-router".to_string(),
        ]);

        assert!(has_arg("--debug-router"));
        assert!(!has_arg("--debug-delivery"));
        assert_eq!(get_arg_value("--config"), Some("/tmp/custom.toml".to_string()));
        assert_eq!(get_arg_value("--missing"), None);
    }
}
