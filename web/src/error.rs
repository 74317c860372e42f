use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;

use sse::{Error as BrokerError, ErrorKind};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Failure reported by the broker core
    Broker(BrokerError),
    /// Request could not be mapped onto a broker operation
    BadRequest(String),
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        match self {
            Error::Broker(err) => write!(fmt, "{err}"),
            Error::BadRequest(msg) => write!(fmt, "Bad request: {msg}"),
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            Error::Broker(err) => match err.error_kind {
                ErrorKind::CapacityExceeded { .. } | ErrorKind::ShutDown => {
                    warn!("Rejecting request: {err}");
                    (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
                }
                ErrorKind::Serialization => {
                    debug!("Rejecting unframeable event: {err}");
                    (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE ENTITY").into_response()
                }
                ErrorKind::DeliveryFailed | ErrorKind::SinkClosed => {
                    error!("Broker failure: {err}");
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
        }
    }
}

impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err)
    }
}
