use agentbus::{
    arguments::{patterns, print_debug_info, print_help},
    broker::{EventStore, Router},
    logger::{self, LogTag},
    paths,
    shutdown::SHUTDOWN_MANAGER,
    webserver,
};
use std::sync::Arc;
use std::time::Duration;

/// Main entry point for the AgentBus broker
///
/// Startup order matters: directories before the logger (log files need the
/// logs directory), logger before config (config load errors should be
/// logged), config before everything that reads tunables.
#[tokio::main]
async fn main() {
    // Ensure all directories exist BEFORE logger initialization
    if let Err(e) = paths::ensure_all_directories() {
        eprintln!("Failed to create required directories: {}", e);
        std::process::exit(1);
    }

    // Initialize logger system (now safe to create log files)
    logger::init();

    // Check for help request first
    if patterns::is_help_requested() {
        print_help();
        std::process::exit(0);
    }

    logger::info(LogTag::System, "AgentBus starting up...");
    print_debug_info();

    // Load configuration (defaults if data/config.toml is absent)
    if let Err(e) = agentbus::config::load_config() {
        logger::error(LogTag::System, &format!("Configuration error: {}", e));
        std::process::exit(1);
    }

    // Open the event store
    let store = match EventStore::open(&paths::get_events_db_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            logger::error(LogTag::System, &format!("Failed to open event store: {}", e));
            std::process::exit(1);
        }
    };

    // Build the router and start its background tasks
    let router = Router::new(store);
    let broker_shutdown = SHUTDOWN_MANAGER.notified();
    let task_handles = router.start(broker_shutdown);

    // Ctrl-C triggers the phased shutdown
    ctrlc::set_handler(move || {
        SHUTDOWN_MANAGER.request_shutdown();
        webserver::shutdown();
    })
    .unwrap_or_else(|e| {
        logger::error(LogTag::System, &format!("Failed to set signal handler: {}", e));
        std::process::exit(1);
    });

    // Run the webserver (blocks until shutdown)
    let state = Arc::new(webserver::AppState::new(router));
    if let Err(e) = webserver::start_server(state).await {
        logger::error(LogTag::System, &format!("Webserver failed: {}", e));
        SHUTDOWN_MANAGER.request_shutdown();
    }

    // Phase 2: drain in-flight deliveries (bounded)
    SHUTDOWN_MANAGER
        .drain_deliveries(Duration::from_secs(10))
        .await;

    // Phase 3: stop background tasks and flush logs
    for handle in task_handles {
        handle.abort();
    }
    logger::info(LogTag::System, "AgentBus stopped");
    logger::flush();
}
