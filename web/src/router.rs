use crate::controller::{event_controller, health_check_controller, metrics_controller};
use crate::sse::handler::sse_handler;
use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use log::*;
use service::AppState;
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .merge(event_routes(app_state.clone()))
        .merge(metrics_routes(app_state.clone()))
        .merge(health_routes(app_state))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
}

fn event_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/events", get(sse_handler))
        .route("/events", post(event_controller::publish))
        .route("/events/:client_id", delete(event_controller::disconnect))
        .with_state(app_state)
}

fn metrics_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_controller::read))
        .route("/reset", post(metrics_controller::reset))
        .with_state(app_state)
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}
