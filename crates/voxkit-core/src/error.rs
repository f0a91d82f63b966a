//! Transport error types

use thiserror::Error;

/// Errors raised by an [`HttpTransport`](crate::HttpTransport)
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host unreachable or connection refused
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout
    #[error("Request timed out")]
    Timeout,

    /// Request could not be built or sent
    #[error("Request failed: {0}")]
    Request(String),

    /// Reading the response body failed
    #[error("Failed to read response body: {0}")]
    Body(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
