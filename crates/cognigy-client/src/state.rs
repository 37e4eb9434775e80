//! Session state machine.
//!
//! `Disconnected -> Connecting -> Initializing -> Ready -> Closed`, with handshake
//! failures falling back to `Disconnected`. `Closed` is terminal. Every state
//! change of a session goes through [`StateMachine`].

use crate::error::Error;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
    last_activity: Option<Instant>,
    expires_in: Option<Duration>,
}

impl StateMachine {
    pub fn new(expires_in: Option<Duration>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_activity: None,
            expires_in,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// `Disconnected -> Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            ConnectionState::Closed => Err(Error::Closed),
            other => Err(Error::InvalidState(other)),
        }
    }

    /// `Connecting -> Initializing`, once the transport reports `connected`.
    pub fn transport_connected(&mut self) -> Result<(), Error> {
        self.advance(ConnectionState::Connecting, ConnectionState::Initializing)
    }

    /// `Initializing -> Ready`; stamps the activity clock.
    pub fn mark_ready(&mut self, now: Instant) -> Result<(), Error> {
        self.advance(ConnectionState::Initializing, ConnectionState::Ready)?;
        self.last_activity = Some(now);
        Ok(())
    }

    /// Handshake failure path back to `Disconnected`. A closed session stays closed.
    pub fn handshake_failed(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Initializing
        ) {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Forces `Closed`. Returns `true` only for the call that performed the transition.
    pub fn close(&mut self) -> bool {
        let was_open = self.state != ConnectionState::Closed;
        self.state = ConnectionState::Closed;
        was_open
    }

    /// Refreshes the activity clock after a successful send.
    pub fn touch(&mut self, now: Instant) {
        if self.state == ConnectionState::Ready {
            self.last_activity = Some(now);
        }
    }

    /// Advisory expiry; never changes the state by itself.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        let (Some(limit), Some(last)) = (self.expires_in, self.last_activity) else {
            return false;
        };
        now.saturating_duration_since(last) > limit
    }

    pub fn is_sendable_at(&self, now: Instant) -> bool {
        self.state == ConnectionState::Ready && !self.is_expired_at(now)
    }

    fn advance(&mut self, from: ConnectionState, to: ConnectionState) -> Result<(), Error> {
        match self.state {
            state if state == from => {
                self.state = to;
                Ok(())
            }
            ConnectionState::Closed => Err(Error::Closed),
            other => Err(Error::InvalidState(other)),
        }
    }
}
