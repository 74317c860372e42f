use log::{error, info};
use service::{config::Config, logging::Logger, AppState};

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting push broker [{}] on {}:{}",
        config.runtime_env(),
        config.interface(),
        config.port
    );

    let sse_manager = service::init_broker(&config);
    let app_state = AppState::new(config, &sse_manager);

    let result = web::init_server(app_state).await;
    sse_manager.shutdown();

    if let Err(e) = result {
        error!("Server terminated with error: {e}");
        std::process::exit(1);
    }
}
