//! Server-Sent Events push broker core.
//!
//! This crate holds long-lived client connections in an in-memory registry
//! and delivers typed events to one, many, or all of them.
//!
//! # Architecture
//!
//! - **Single-lock registry**: client handles plus user and session indexes
//!   live behind one mutex, so an index never disagrees with the primary map.
//! - **Opaque sinks**: the core only writes bytes to a `Sink` and closes it.
//!   `ChannelSink` pairs a sink with a `ClientStream` the transport pumps.
//! - **Independent fan-out**: multi-client sends run concurrently and a failing
//!   client only lowers the delivered count.
//! - **Maintenance loops**: a heartbeat loop pings every client and an idle
//!   sweep evicts clients silent for longer than the configured timeout.
//! - **Ephemeral delivery**: there is no queuing. A client that is not
//!   connected misses the event.
//!
//! # Message Flow
//!
//! 1. The transport calls `Manager::create_client` and streams the returned `ClientStream`
//! 2. The client is registered and immediately receives a `connection` event
//! 3. Producers call `Manager::send_event` (or `broadcast`, `send_to_user`, ...)
//! 4. The registry resolves the `Filter` to handles
//! 5. The dispatcher formats the event once and writes it to every target
//! 6. When the transport drops the stream it calls `Manager::remove_client`
//!
//! # Example: Sending an event
//!
//! ```rust,ignore
//! use sse::message::{Event, Filter};
//! use serde_json::json;
//!
//! let event = Event::new("notification", json!({ "message": "hi" })).with_id("abc");
//! let delivered = manager
//!     .send_event(&event, &Filter::User { user_id: "u1".to_string() })
//!     .await?;
//! ```
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry, ClientHandle and the type-safe ClientId
//! - `dispatcher`: wire formatting and concurrent fan-out
//! - `scheduler`: heartbeat and idle-sweep background loops
//! - `manager`: the broker's public operations
//! - `message`: events, filters and well-known event factories
//! - `sink`: the transport capability trait and its channel implementation

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod scheduler;
pub mod sink;

pub use config::BrokerConfig;
pub use error::{Error, ErrorKind};
pub use manager::Manager;
