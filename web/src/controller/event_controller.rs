use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;
use serde::{Deserialize, Serialize};

use crate::controller::ApiResponse;
use crate::{Error, Result};
use service::AppState;
use sse::connection::ClientId;
use sse::message::{Event, Filter, Message};

/// Request body for publishing an event.
///
/// At most one of `client_ids`, `user_id` or `session_id` may be given;
/// none of them means broadcast.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(flatten)]
    pub event: Event,
    pub client_ids: Option<Vec<String>>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

impl PublishRequest {
    fn into_message(self) -> Result<Message> {
        let filter = match (self.client_ids, self.user_id, self.session_id) {
            (None, None, None) => Filter::Broadcast,
            (Some(client_ids), None, None) => Filter::Clients {
                client_ids: client_ids.into_iter().map(ClientId::from).collect(),
            },
            (None, Some(user_id), None) => Filter::User { user_id },
            (None, None, Some(session_id)) => Filter::Session { session_id },
            _ => {
                return Err(Error::BadRequest(
                    "specify at most one of client_ids, user_id or session_id".to_string(),
                ))
            }
        };
        Ok(Message {
            event: self.event,
            filter,
        })
    }
}

/// POST publish an event to the clients selected by the request's filter
pub async fn publish(
    State(app_state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<impl IntoResponse> {
    let message = request.into_message()?;
    debug!(
        "Publishing event {} to {:?}",
        message.event.event_type(),
        message.filter
    );

    let delivered = app_state.sse_manager.send_message(&message).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        PublishResponse { delivered },
    )))
}

/// DELETE disconnect a client by id
pub async fn disconnect(
    State(app_state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    let client_id = ClientId::from(client_id);
    if app_state.sse_manager.remove_client(&client_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "NOT FOUND").into_response()
    }
}
