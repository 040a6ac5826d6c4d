/// Configuration system for AgentBus
///
/// Structures are declared once in `schemas` with embedded defaults via the
/// `config_struct!` macro; `utils` owns the global instance and file I/O.
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{
    BrokerConfig, ClientConfig, Config, DeliveryConfig, StoreConfig, WebserverConfig,
    WebsocketConfig,
};
pub use utils::{load_config, load_config_from_path, reload_config, set_config, with_config, CONFIG};
