//! Duplex event transport.
//!
//! The session only ever talks to the socket through these traits:
//!
//! - [`Transport`] opens a [`Connection`] to an endpoint.
//! - [`Channel`] is the outbound half (emit named events, close).
//! - The inbound half is a stream of [`TransportSignal`]s, delivered in the order
//!   they came off the network.
//!
//! Two bindings ship with the crate: [`socketio::SocketIoTransport`] for real
//! backends and [`memory::MemoryTransport`] for tests.

pub mod memory;
pub mod socketio;

use async_trait::async_trait;
use cognigy_types::InboundEvent;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use memory::{Emitted, MemoryPeer, MemoryServer, MemoryTransport};
pub use socketio::SocketIoTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("unsupported transport options: {0}")]
    Unsupported(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire transports a socket client may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

/// Low-level socket options forwarded to the transport binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolOptions {
    /// Request path of the socket endpoint.
    pub path: String,
    /// Acceptable transports, in order of preference.
    pub transports: Vec<TransportKind>,
    /// Upper bound on establishing the underlying connection.
    pub connect_timeout: Option<Duration>,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            path: "/socket.io/".to_string(),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            connect_timeout: None,
        }
    }
}

/// Everything needed to open one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub options: ProtocolOptions,
}

impl OpenRequest {
    /// Looks up a handshake query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// What the transport reports on its inbound side.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Connected,
    ConnectError(String),
    ConnectTimeout,
    Event(InboundEvent),
    Disconnected(String),
}

/// Outbound half of an open connection.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Emits a named event with a JSON payload.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Closes the connection. Calling it more than once is harmless.
    async fn close(&self);
}

/// An open connection: outbound channel plus the inbound signal stream.
pub struct Connection {
    pub channel: Arc<dyn Channel>,
    pub signals: mpsc::Receiver<TransportSignal>,
}

/// Opens duplex event connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts connecting. Returns as soon as the connection attempt is under way;
    /// its outcome arrives as a `Connected`, `ConnectError` or `ConnectTimeout` signal.
    async fn open(&self, request: OpenRequest) -> Result<Connection, TransportError>;
}
