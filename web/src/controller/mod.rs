use serde::Serialize;

pub(crate) mod event_controller;
pub(crate) mod health_check_controller;
pub(crate) mod metrics_controller;

/// Envelope for every JSON response body
#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status_code: u16, data: T) -> Self {
        Self {
            status_code,
            data: Some(data),
        }
    }

    pub fn no_content(status_code: u16) -> ApiResponse<()> {
        ApiResponse {
            status_code,
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use sse::metrics::MetricsSnapshot;

    #[test]
    fn test_serialize_api_response_wraps_metrics_snapshot() {
        let snapshot = MetricsSnapshot {
            active_connections: 2,
            total_connections: 5,
            ..Default::default()
        };
        let response = ApiResponse::new(StatusCode::OK.into(), snapshot);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["data"]["activeConnections"], 2);
        assert_eq!(value["data"]["totalConnections"], 5);
    }

    #[test]
    fn test_serialize_api_response_without_data() {
        let response = ApiResponse::<()>::no_content(StatusCode::OK.into());
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"status_code": 200}));
    }
}
