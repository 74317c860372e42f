use crate::Result;
use async_stream::stream;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use log::*;
use serde::Deserialize;
use service::AppState;
use sse::connection::ClientId;
use sse::Manager;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConnectParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Deregisters the client when the response stream is dropped, which is how
/// a remote hang-up surfaces in axum.
struct DisconnectGuard {
    manager: Arc<Manager>,
    client_id: ClientId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.manager.remove_client(&self.client_id) {
            debug!("Event stream for client {} dropped, cleaned up", self.client_id);
        }
    }
}

/// GET establishes a long-lived event stream for the optional user and session.
pub(crate) async fn sse_handler(
    State(app_state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Result<Response> {
    debug!(
        "Establishing event stream (user: {:?}, session: {:?})",
        params.user_id, params.session_id
    );

    let (handle, mut client_stream) = app_state
        .sse_manager
        .create_client(params.user_id, params.session_id)
        .await?;

    let guard = DisconnectGuard {
        manager: app_state.sse_manager.clone(),
        client_id: handle.id().clone(),
    };

    // Frames are already in wire format; pass them through untouched
    let stream = stream! {
        let _guard = guard;
        while let Some(frame) = client_stream.recv().await {
            yield Ok::<_, Infallible>(frame);
        }
        debug!("Event stream closed by broker");
    };

    Ok((
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
