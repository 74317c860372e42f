use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;

use crate::controller::ApiResponse;
use service::AppState;

/// GET broker metrics
pub async fn read(State(app_state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::new(
        StatusCode::OK.into(),
        app_state.sse_manager.get_metrics(),
    ))
}

/// POST disconnect every client, zero the counters and restart maintenance loops
pub async fn reset(State(app_state): State<AppState>) -> impl IntoResponse {
    info!("Broker reset requested");
    app_state.sse_manager.reset();
    Json(ApiResponse::<()>::no_content(StatusCode::OK.into()))
}
