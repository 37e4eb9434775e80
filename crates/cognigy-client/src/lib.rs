//! Client for the Cognigy socket endpoint.
//!
//! A [`Session`] resolves credentials, runs the connect/`init` handshake, then
//! exchanges events with a flow until it is closed. Submodules:
//!
//! - `credentials`: token resolution, including the `/loginDevice` exchange.
//! - `transport`: the duplex event channel and its Socket.IO and in-memory bindings.
//! - `state`: the connection state machine and inactivity expiry.
//! - `dispatcher`: classification and routing of inbound events.
//! - `session`: the public command surface.

pub mod config;
mod correlation;
pub mod credentials;
pub mod dispatcher;
pub mod error;
mod handshake;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{EarlyEvents, HandshakeMode, SessionConfig};
pub use credentials::{CredentialResolver, Credentials, Token};
pub use dispatcher::classify;
pub use error::{AuthError, Error};
pub use session::Session;
pub use state::ConnectionState;
pub use transport::{
    Channel, Connection, OpenRequest, ProtocolOptions, SocketIoTransport, Transport,
    TransportError, TransportKind, TransportSignal,
};
