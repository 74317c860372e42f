use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use service::AppState;

/// GET reports liveness; 503 once the broker has been shut down
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    if app_state.sse_manager.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shut down");
    }
    (StatusCode::OK, "healthy")
}
