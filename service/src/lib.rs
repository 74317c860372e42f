use config::Config;
use log::info;
use sse::Manager;
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Build the broker from configuration. Starts its background loops, so it
/// must be called from within the Tokio runtime.
pub fn init_broker(config: &Config) -> Arc<Manager> {
    let broker_config = config.broker_config();
    info!(
        "Broker config: heartbeat_interval={:?}, client_timeout={:?}, max_clients={}",
        broker_config.heartbeat_interval(),
        broker_config.client_timeout(),
        broker_config.max_clients(),
    );

    Arc::new(Manager::new(broker_config))
}

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub sse_manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, sse_manager: &Arc<Manager>) -> Self {
        Self {
            sse_manager: Arc::clone(sse_manager),
            config: app_config,
        }
    }
}
