//! Session configuration, supplied once and read-only afterwards.

use crate::transport::ProtocolOptions;
use cognigy_types::InputEvent;
use std::time::Duration;

pub const DEFAULT_CORRELATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How the session is brought to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeMode {
    /// Transport connect followed by the `init` / `initResponse` exchange.
    #[default]
    TwoPhase,
    /// Endpoints that accept input right after the transport connects.
    SinglePhase,
}

/// What happens to backend events that arrive before the session is `Ready`.
/// An `exception` always aborts the handshake regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyEvents {
    #[default]
    Drop,
    /// Keep them and dispatch them, in order, right after `Ready`.
    Buffer,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Socket endpoint URL.
    pub endpoint: String,
    pub flow: String,
    pub language: String,
    pub version: Option<u32>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub passthrough_ip: Option<String>,
    pub reset_state: bool,
    pub reset_context: bool,
    pub reload_flow: bool,
    pub reset_flow: bool,
    /// Inactivity after which the session reports itself expired.
    pub expires_in: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub init_timeout: Option<Duration>,
    pub correlation_timeout: Duration,
    pub handshake: HandshakeMode,
    pub early_events: EarlyEvents,
    pub input_event: InputEvent,
    pub protocol: ProtocolOptions,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            flow: String::new(),
            language: String::new(),
            version: None,
            user_id: None,
            session_id: None,
            passthrough_ip: None,
            reset_state: false,
            reset_context: false,
            reload_flow: false,
            reset_flow: false,
            expires_in: None,
            connect_timeout: None,
            init_timeout: None,
            correlation_timeout: DEFAULT_CORRELATION_TIMEOUT,
            handshake: HandshakeMode::default(),
            early_events: EarlyEvents::default(),
            input_event: InputEvent::default(),
            protocol: ProtocolOptions::default(),
        }
    }

    pub fn with_flow(mut self, flow: impl Into<String>, language: impl Into<String>) -> Self {
        self.flow = flow.into();
        self.language = language.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_identity(
        mut self,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        self.user_id = Some(user_id.into());
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self.protocol.connect_timeout = Some(timeout);
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation_timeout = timeout;
        self
    }

    pub fn with_handshake(mut self, mode: HandshakeMode) -> Self {
        self.handshake = mode;
        self
    }

    pub fn with_early_events(mut self, policy: EarlyEvents) -> Self {
        self.early_events = policy;
        self
    }

    pub fn with_input_event(mut self, event: InputEvent) -> Self {
        self.input_event = event;
        self
    }
}
