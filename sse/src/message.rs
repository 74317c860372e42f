use crate::connection::{ClientId, SessionId, UserId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

pub const CONNECTION_EVENT: &str = "connection";
pub const HEARTBEAT_EVENT: &str = "heartbeat";
pub const ERROR_EVENT: &str = "error";

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An outbound event. Immutable once built; carries no reference back to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<u64>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            id: None,
            retry: None,
        }
    }

    /// Sets the id used by clients for resumption (`Last-Event-ID`).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the suggested reconnect delay in milliseconds.
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    /// Periodic liveness event emitted by the scheduler.
    pub fn heartbeat() -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Event::new(HEARTBEAT_EVENT, json!({ "timestamp": timestamp }))
            .with_id(unique_id(HEARTBEAT_EVENT, timestamp))
    }

    /// First event every newly registered client receives.
    pub fn connection_ack(client_id: &ClientId) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Event::new(
            CONNECTION_EVENT,
            json!({
                "clientId": client_id.as_str(),
                "message": "Connected to event stream",
                "timestamp": timestamp,
            }),
        )
        .with_id(unique_id(CONNECTION_EVENT, timestamp))
    }

    /// Error notice for the transport layer to push to a client.
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        let mut data = json!({
            "message": message.into(),
            "timestamp": timestamp,
        });
        if let Some(code) = code {
            data["code"] = Value::String(code.to_string());
        }
        Event::new(ERROR_EVENT, data).with_id(unique_id(ERROR_EVENT, timestamp))
    }
}

// Millisecond timestamp plus a process-wide sequence: unique, not unguessable
fn unique_id(prefix: &str, timestamp: i64) -> String {
    let seq = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{timestamp}-{seq}")
}

/// Selects the delivery targets for a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every registered client
    Broadcast,
    /// An explicit set of clients; unknown ids are skipped
    Clients { client_ids: Vec<ClientId> },
    /// All connections for a specific user
    User { user_id: UserId },
    /// All connections for a specific session
    Session { session_id: SessionId },
}

#[derive(Debug, Clone)]
pub struct Message {
    pub event: Event,
    pub filter: Filter,
}
