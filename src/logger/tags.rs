/// Log tags identifying the originating subsystem
///
/// Each tag maps to a --debug-<module> flag; the formatting module assigns
/// each one a fixed color and column width so logs line up.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogTag {
    /// Router core (publish path, matching, queueing)
    Router,
    /// Delivery engine (attempts, retries, acks, dead letters)
    Delivery,
    /// Event store (appends, range reads, maintenance)
    Store,
    /// HTTP server and WebSocket hub
    Webserver,
    /// Client session lifecycle
    Session,
    /// Client SDK
    Client,
    /// Startup, shutdown, configuration
    System,
    /// Test-only logging
    Test,
    /// Anything else (ad-hoc tag string)
    Other(String),
}

impl LogTag {
    /// Key used for --debug-<key> / --verbose-<key> flag lookups
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::Router => "router".to_string(),
            LogTag::Delivery => "delivery".to_string(),
            LogTag::Store => "store".to_string(),
            LogTag::Webserver => "webserver".to_string(),
            LogTag::Session => "session".to_string(),
            LogTag::Client => "client".to_string(),
            LogTag::System => "system".to_string(),
            LogTag::Test => "test".to_string(),
            LogTag::Other(s) => s.to_lowercase(),
        }
    }

    /// Uncolored display string for file output
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::Router => "ROUTER".to_string(),
            LogTag::Delivery => "DELIVERY".to_string(),
            LogTag::Store => "STORE".to_string(),
            LogTag::Webserver => "WEBSERVER".to_string(),
            LogTag::Session => "SESSION".to_string(),
            LogTag::Client => "CLIENT".to_string(),
            LogTag::System => "SYSTEM".to_string(),
            LogTag::Test => "TEST".to_string(),
            LogTag::Other(s) => s.to_uppercase(),
        }
    }
}
