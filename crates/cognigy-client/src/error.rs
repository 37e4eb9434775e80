//! Error types for the session client.

use crate::state::ConnectionState;
use crate::transport::TransportError;
use std::time::Duration;

/// Failures while turning [`Credentials`](crate::Credentials) into a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither a token nor the full identity triple was supplied.
    #[error("no token supplied and identity is incomplete: missing `{0}`")]
    MissingIdentity(&'static str),

    /// The credential exchange request could not be completed or decoded.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered the exchange with a non-success status.
    #[error("credential exchange rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The backend answered with success but without a usable token.
    #[error("credential exchange returned no token")]
    NoToken,
}

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The transport phase of the handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The `init` exchange failed or timed out.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The session is not `Ready`, or it has expired.
    #[error("session is not connected")]
    NotConnected,

    /// A correlated command got no reply in time.
    #[error("no reply to `{event}` within {timeout:?}")]
    CorrelationTimeout {
        event: &'static str,
        timeout: Duration,
    },

    /// The session closed while a correlated command was waiting.
    #[error("session closed before `{0}` was answered")]
    CorrelationAborted(&'static str),

    /// The session has been closed and cannot be reused.
    #[error("session is closed; create a new one")]
    Closed,

    /// `connect()` was called while a handshake is running or already done.
    #[error("cannot connect while session is {0}")]
    InvalidState(ConnectionState),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
