//! Event formatting and fan-out to client sinks.
//!
//! The dispatcher knows nothing about the registry: it is handed client
//! handles and writes to their sinks. A failing client never affects delivery
//! to any other client.

use crate::connection::ClientHandle;
use crate::error::{Error, ErrorKind};
use crate::message::Event;
use log::*;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Serialize an event into the Server-Sent Events wire format.
///
/// Field order is `event`, `id`, `retry`, one `data` line per payload line,
/// then a single blank line. String payloads pass through; anything else is
/// JSON-encoded. Payload lines may end in `\n`, `\r\n` or a lone `\r`.
///
/// An event type or id containing a line break would inject framing lines and
/// is rejected with `ErrorKind::Serialization`.
pub fn format_wire_message(event: &Event) -> Result<String, Error> {
    check_framing(event)?;

    let mut message = String::new();

    if !event.event_type().is_empty() {
        message.push_str(&format!("event: {}\n", event.event_type()));
    }
    if let Some(id) = event.id() {
        message.push_str(&format!("id: {id}\n"));
    }
    if let Some(retry) = event.retry().filter(|retry| *retry > 0) {
        message.push_str(&format!("retry: {retry}\n"));
    }

    let payload = match event.data() {
        Value::String(text) => Cow::Borrowed(text.as_str()),
        other => Cow::Owned(serde_json::to_string(other)?),
    };
    for line in payload.replace("\r\n", "\n").split(['\r', '\n']) {
        message.push_str("data: ");
        message.push_str(line);
        message.push('\n');
    }

    message.push('\n');
    Ok(message)
}

/// Reject events whose type or id would break out of their own field line.
pub fn check_framing(event: &Event) -> Result<(), Error> {
    check_single_line("event type", event.event_type())?;
    match event.id() {
        Some(id) => check_single_line("event id", id),
        None => Ok(()),
    }
}

fn check_single_line(field: &str, value: &str) -> Result<(), Error> {
    if value.contains(['\r', '\n']) {
        return Err(Error::with_source(
            ErrorKind::Serialization,
            format!("{field} must not contain line breaks"),
        ));
    }
    Ok(())
}

/// Format and write one event to one client. Failures are logged and reported as `false`.
pub async fn send_to(handle: &ClientHandle, event: &Event) -> bool {
    match format_wire_message(event) {
        Ok(frame) => deliver(handle, &frame, event.event_type()).await,
        Err(e) => {
            warn!(
                "Failed to format event {} for client {}: {e}",
                event.event_type(),
                handle.id()
            );
            false
        }
    }
}

/// Write one event to every handle concurrently and return how many writes succeeded.
///
/// Individual write failures only reduce the count. An `Err` means the fan-out
/// itself broke (unencodable payload or a panicked write task).
pub async fn send_to_many(handles: &[Arc<ClientHandle>], event: &Event) -> Result<usize, Error> {
    if handles.is_empty() {
        return Ok(0);
    }

    let frame: Arc<str> = Arc::from(format_wire_message(event)?);
    let event_type: Arc<str> = Arc::from(event.event_type());

    let mut writes = JoinSet::new();
    for handle in handles {
        let handle = Arc::clone(handle);
        let frame = Arc::clone(&frame);
        let event_type = Arc::clone(&event_type);
        writes.spawn(async move { deliver(&handle, &frame, &event_type).await });
    }

    let mut delivered = 0;
    let mut failure = None;
    while let Some(result) = writes.join_next().await {
        match result {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(e) => {
                error!("Write task for event {event_type} did not complete: {e}");
                failure.get_or_insert(e);
            }
        }
    }

    match failure {
        Some(e) => Err(Error::with_source(ErrorKind::DeliveryFailed, e)),
        None => Ok(delivered),
    }
}

async fn deliver(handle: &ClientHandle, frame: &str, event_type: &str) -> bool {
    match handle.sink().write(frame.as_bytes()).await {
        Ok(()) => {
            trace!("Sent event {event_type} to client {}", handle.id());
            true
        }
        Err(e) => {
            warn!(
                "Failed to send event {event_type} to client {}: {e}",
                handle.id()
            );
            false
        }
    }
}
