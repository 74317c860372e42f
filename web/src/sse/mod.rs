//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the event stream endpoint.
//! The broker itself (Manager, ConnectionRegistry, dispatcher) lives in the
//! `sse` crate.

pub(crate) mod handler;
