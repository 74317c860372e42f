//! Error types for the push broker core
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

/// Errors raised by the broker core.
/// The intent is to separate failures a caller must react to (capacity, shut down)
/// from failures that are recovered locally and only surface as counts.
#[derive(Debug)]
pub struct Error {
    // Underlying error, when one exists (e.g. serde_json or a panicked write task)
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    // Registration rejected because the registry already holds `max_clients` handles
    CapacityExceeded { max_clients: usize },
    // The client's sink was closed before or during a write
    SinkClosed,
    // Event payload could not be encoded to text
    Serialization,
    // Failure escaping the fan-out mechanism itself
    DeliveryFailed,
    // The manager was shut down and no longer accepts work
    ShutDown,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn with_source(
        error_kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            error_kind,
        }
    }

    pub fn capacity_exceeded(max_clients: usize) -> Self {
        Self::new(ErrorKind::CapacityExceeded { max_clients })
    }

    pub fn sink_closed() -> Self {
        Self::new(ErrorKind::SinkClosed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.error_kind {
            ErrorKind::CapacityExceeded { max_clients } => {
                write!(f, "Client capacity exceeded (max {max_clients})")
            }
            ErrorKind::SinkClosed => write!(f, "Client sink is closed"),
            ErrorKind::Serialization => write!(f, "Failed to serialize event payload"),
            ErrorKind::DeliveryFailed => write!(f, "Event delivery failed"),
            ErrorKind::ShutDown => write!(f, "Broker has been shut down"),
        }?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| err.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Serialization, err)
    }
}
