/// Configuration schemas - all config structures defined once with defaults
///
/// Each struct is defined using the config_struct! macro which provides:
/// - Single-source definition (no repetition)
/// - Embedded defaults
/// - Type safety
/// - Serde support
///
/// Priority level counts and every backoff constant live here rather than in
/// code; the values below are defaults, not contracts.
use crate::config_struct;

// ============================================================================
// BROKER CONFIGURATION
// ============================================================================

config_struct! {
    /// Router core configuration
    pub struct BrokerConfig {
        /// Number of priority levels (levels are 0..priority_levels)
        priority_levels: u8 = 10,

        /// Default priority assigned when a publish omits one
        default_priority: u8 = 4,

        /// Maximum pending events across all priority levels
        queue_max_size: usize = 10_000,

        /// Maximum serialized payload size in bytes
        max_payload_bytes: usize = 262_144,

        /// Maximum dot-separated segments in a topic or pattern
        max_topic_segments: usize = 16,

        /// Publish recursion guard: max handler-originated publish depth
        max_publish_depth: u32 = 16,

        /// Publish accept timeout (bounds the store append)
        accept_timeout_ms: u64 = 5_000,
    }
}

// ============================================================================
// DELIVERY CONFIGURATION
// ============================================================================

config_struct! {
    /// Delivery engine configuration
    pub struct DeliveryConfig {
        /// Number of delivery worker tasks
        workers: usize = 4,

        /// Per-attempt acknowledgment timeout
        ack_timeout_ms: u64 = 5_000,

        /// Delivery attempts before dead-lettering
        max_retries: u32 = 5,

        /// Exponential backoff base delay between attempts
        retry_backoff_base_ms: u64 = 500,

        /// Backoff ceiling
        retry_backoff_max_ms: u64 = 30_000,
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

config_struct! {
    /// Event store configuration
    pub struct StoreConfig {
        /// Days events are retained before the maintenance sweep purges them
        retention_days: i64 = 30,

        /// Days dead letter entries are retained
        dead_letter_retention_days: i64 = 30,

        /// Maintenance sweep interval
        maintenance_interval_secs: u64 = 3_600,
    }
}

// ============================================================================
// WEBSERVER CONFIGURATION
// ============================================================================

config_struct! {
    /// WebSocket-specific settings
    pub struct WebsocketConfig {
        /// Server ping cadence
        heartbeat_secs: u64 = 30,

        /// Disconnect a client with no activity for this long
        client_idle_timeout_secs: u64 = 90,

        /// Per-connection outbound buffer (events pending on the socket)
        buffer_size: usize = 256,
    }
}

config_struct! {
    /// HTTP/WebSocket server configuration
    pub struct WebserverConfig {
        host: String = "127.0.0.1".to_string(),
        port: u16 = 8650,

        /// Destroy a disconnected session after this long
        session_idle_timeout_secs: u64 = 3_600,

        /// Session janitor sweep interval
        session_sweep_interval_secs: u64 = 60,

        websocket: WebsocketConfig = WebsocketConfig::default(),
    }
}

// ============================================================================
// CLIENT SDK CONFIGURATION
// ============================================================================

config_struct! {
    /// Client SDK defaults (agent processes may override per connection)
    pub struct ClientConfig {
        /// Reconnect backoff base delay
        reconnect_base_delay_ms: u64 = 500,

        /// Reconnect backoff ceiling
        reconnect_max_delay_ms: u64 = 30_000,

        /// Reconnect attempts before surfacing a fatal connectivity error
        reconnect_max_attempts: u32 = 20,

        /// Local outbound queue capacity while disconnected
        outbound_queue_size: usize = 1_000,

        /// Client heartbeat cadence
        heartbeat_secs: u64 = 20,
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration (data/config.toml)
    pub struct Config {
        broker: BrokerConfig = BrokerConfig::default(),
        delivery: DeliveryConfig = DeliveryConfig::default(),
        store: StoreConfig = StoreConfig::default(),
        webserver: WebserverConfig = WebserverConfig::default(),
        client: ClientConfig = ClientConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.broker.priority_levels, 10);
        assert!(config.broker.default_priority < config.broker.priority_levels);
        assert!(config.delivery.retry_backoff_base_ms <= config.delivery.retry_backoff_max_ms);
        assert!(config.broker.queue_max_size > 0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [broker]
            queue_max_size = 42

            [webserver]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(parsed.broker.queue_max_size, 42);
        assert_eq!(parsed.broker.priority_levels, 10);
        assert_eq!(parsed.webserver.port, 9000);
        assert_eq!(parsed.webserver.websocket.heartbeat_secs, 30);
    }
}
