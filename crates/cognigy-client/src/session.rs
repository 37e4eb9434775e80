//! The session and its command surface.

use crate::config::SessionConfig;
use crate::credentials::{CredentialResolver, Credentials, Token};
use crate::correlation::WaitFailure;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::handshake::{self, Established};
use crate::state::{ConnectionState, StateMachine};
use crate::transport::{Channel, SocketIoTransport, Transport, TransportSignal};
use cognigy_types::{
    ClientCommand, ErrorNotice, FinalPing, FlowOutput, InboundEvent, InjectRequest,
    InputMessage, ReplyKind, ResetFlowRequest, SessionRef, events,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{Instrument, debug, info, instrument, warn};

const INPUT_SOURCE: &str = "device";

/// State shared between the caller-facing [`Session`] and its reactor task.
pub(crate) struct Shared {
    pub config: SessionConfig,
    credentials: Credentials,
    resolver: CredentialResolver,
    transport: Arc<dyn Transport>,
    state: Mutex<StateMachine>,
    token: OnceLock<Token>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    shutdown: watch::Sender<bool>,
    dispatcher: Dispatcher,
}

impl Shared {
    pub fn lock_state(&self) -> MutexGuard<'_, StateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_channel(&self) -> MutexGuard<'_, Option<Arc<dyn Channel>>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flips to `true` once the session is closed, from either side.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Transport-initiated end of a ready session. Reported at most once.
    async fn terminate(&self, reason: String) {
        if !self.lock_state().close() {
            return;
        }
        self.shutdown.send_replace(true);
        let aborted = self.dispatcher.pending().abort_all();
        let channel = self.lock_channel().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        warn!(%reason, aborted, "session terminated by transport");
        self.dispatcher.notify_termination(reason);
    }
}

/// A conversation with the backend over one socket.
///
/// Cheap to clone; clones share the same connection. Callers must `connect()`
/// before sending. Every command fails with [`Error::NotConnected`] unless the
/// session is `Ready` and not expired, in which case nothing is sent.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// A session over the Socket.IO transport.
    pub fn new(credentials: Credentials, config: SessionConfig) -> Self {
        Self::with_transport(credentials, config, Arc::new(SocketIoTransport::new()))
    }

    pub fn with_transport(
        credentials: Credentials,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::from_parts(credentials, config, transport, CredentialResolver::default())
    }

    pub fn from_parts(
        credentials: Credentials,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        resolver: CredentialResolver,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let state = StateMachine::new(config.expires_in);
        Self {
            shared: Arc::new(Shared {
                config,
                credentials,
                resolver,
                transport,
                state: Mutex::new(state),
                token: OnceLock::new(),
                channel: Mutex::new(None),
                shutdown,
                dispatcher: Dispatcher::default(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock_state().state()
    }

    /// The resolved token, once `connect()` got that far.
    pub fn token(&self) -> Option<Token> {
        self.shared.token.get().cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Whether the session sat idle longer than the configured expiry.
    /// Advisory only: an expired session stays `Ready` until disconnected.
    pub fn is_expired(&self) -> bool {
        self.shared.lock_state().is_expired_at(Instant::now())
    }

    pub fn is_sendable(&self) -> bool {
        self.shared.lock_state().is_sendable_at(Instant::now())
    }

    pub fn on_output(&self, handler: impl Fn(FlowOutput) + Send + Sync + 'static) {
        self.shared.dispatcher.handlers().output = Some(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(ErrorNotice) + Send + Sync + 'static) {
        self.shared.dispatcher.handlers().error = Some(Arc::new(handler));
    }

    pub fn on_final_ping(&self, handler: impl Fn(FinalPing) + Send + Sync + 'static) {
        self.shared.dispatcher.handlers().final_ping = Some(Arc::new(handler));
    }

    /// Called once if the transport drops a ready session. Not called for `disconnect()`.
    pub fn on_termination(&self, handler: impl Fn(String) + Send + Sync + 'static) {
        self.shared.dispatcher.handlers().termination = Some(Arc::new(handler));
    }

    /// Resolves the token and runs the handshake. Returns once the session is
    /// `Ready`, or fails and leaves it `Disconnected`.
    #[instrument(skip_all, fields(endpoint = %self.shared.config.endpoint))]
    pub async fn connect(&self) -> Result<(), Error> {
        self.shared.lock_state().begin_connect()?;
        match self.establish().await {
            Ok(()) => {
                info!("session ready");
                Ok(())
            }
            Err(e) => {
                self.shared.lock_state().handshake_failed();
                warn!(error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let token = match shared.token.get() {
            Some(token) => token.clone(),
            None => {
                let mut shutdown = shared.shutdown_signal();
                let token = tokio::select! {
                    resolved = shared.resolver.resolve(&shared.credentials) => resolved?,
                    _ = shutdown.wait_for(|closed| *closed) => return Err(Error::Closed),
                };
                shared.token.get_or_init(|| token).clone()
            }
        };
        // No transport is opened for a session closed while resolving.
        if shared.lock_state().state() == ConnectionState::Closed {
            return Err(Error::Closed);
        }

        let Established {
            channel,
            signals,
            early,
        } = handshake::perform(shared, shared.transport.as_ref(), &token).await?;

        // disconnect() may have run at any point above. The channel is stored
        // under the state lock so that it either sees it or we see `Closed`.
        let ready = {
            let mut state = shared.lock_state();
            let ready = state.mark_ready(Instant::now());
            if ready.is_ok() {
                *shared.lock_channel() = Some(channel.clone());
            }
            ready
        };
        if let Err(e) = ready {
            channel.close().await;
            return Err(e);
        }

        let span = tracing::info_span!("session_reactor", endpoint = %shared.config.endpoint);
        tokio::spawn(run_reactor(shared.clone(), signals, early).instrument(span));
        Ok(())
    }

    /// Submits a user turn. Replies arrive through the registered handlers.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), Error> {
        self.submit(text.into(), Value::Null).await
    }

    /// Submits a user turn with structured data attached.
    pub async fn send_message_with_data<T: Serialize>(
        &self,
        text: impl Into<String>,
        data: &T,
    ) -> Result<(), Error> {
        self.submit(text.into(), serde_json::to_value(data)?).await
    }

    async fn submit(&self, text: String, data: Value) -> Result<(), Error> {
        let config = &self.shared.config;
        let message = InputMessage {
            url_token: self
                .shared
                .token
                .get()
                .map(|token| token.expose().to_string())
                .unwrap_or_default(),
            user_id: config.user_id.clone(),
            session_id: config.session_id.clone(),
            source: INPUT_SOURCE.to_string(),
            passthrough_ip: config.passthrough_ip.clone(),
            reload_flow: config.reload_flow,
            reset_flow: config.reset_flow,
            reset_state: config.reset_state,
            reset_context: config.reset_context,
            text,
            data,
        };
        self.send(ClientCommand::Input {
            event: config.input_event,
            message,
        })
        .await
    }

    pub async fn reset_flow(
        &self,
        flow_id: impl Into<String>,
        language: impl Into<String>,
        version: Option<u32>,
    ) -> Result<(), Error> {
        self.send(ClientCommand::ResetFlow(ResetFlowRequest {
            flow_id: flow_id.into(),
            language: language.into(),
            version,
        }))
        .await
    }

    pub async fn reset_state(&self) -> Result<(), Error> {
        self.send(ClientCommand::ResetState(self.session_ref())).await
    }

    pub async fn reset_context(&self) -> Result<(), Error> {
        self.send(ClientCommand::ResetContext(self.session_ref()))
            .await
    }

    /// Merges `payload` into the conversation context and returns the new context.
    pub async fn inject_context(&self, payload: Value) -> Result<Value, Error> {
        self.correlated(ReplyKind::Context, payload).await
    }

    /// Replaces the conversation state and returns what the backend reports back.
    pub async fn inject_state(&self, payload: Value) -> Result<Value, Error> {
        self.correlated(ReplyKind::State, payload).await
    }

    /// Closes the channel and moves to `Closed`. Safe to call in any state, any
    /// number of times. Waiting correlated commands fail with
    /// [`Error::CorrelationAborted`].
    pub async fn disconnect(&self) {
        let closed_now = self.shared.lock_state().close();
        self.shared.shutdown.send_replace(true);
        let aborted = self.shared.dispatcher.pending().abort_all();
        let channel = self.shared.lock_channel().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        if closed_now {
            info!(aborted, "session closed");
        }
    }

    fn session_ref(&self) -> SessionRef {
        SessionRef {
            user_id: self.shared.config.user_id.clone(),
            session_id: self.shared.config.session_id.clone(),
        }
    }

    /// The open channel, if the session may send right now.
    fn sendable_channel(&self) -> Result<Arc<dyn Channel>, Error> {
        let state = self.shared.lock_state();
        if !state.is_sendable_at(Instant::now()) {
            return Err(Error::NotConnected);
        }
        self.shared.lock_channel().clone().ok_or(Error::NotConnected)
    }

    async fn send(&self, command: ClientCommand) -> Result<(), Error> {
        let channel = self.sendable_channel()?;
        self.emit(channel.as_ref(), &command).await
    }

    async fn emit(&self, channel: &dyn Channel, command: &ClientCommand) -> Result<(), Error> {
        channel
            .emit(command.event_name(), command.to_payload()?)
            .await?;
        self.shared.lock_state().touch(Instant::now());
        debug!(event = command.event_name(), "command sent");
        Ok(())
    }

    async fn correlated(&self, kind: ReplyKind, data: Value) -> Result<Value, Error> {
        let channel = self.sendable_channel()?;
        let pending = self.shared.dispatcher.pending();
        let (correlation_id, rx) = pending.register(kind);
        let request = InjectRequest {
            correlation_id: correlation_id.clone(),
            data,
        };
        let (event, command) = match kind {
            ReplyKind::Context => (events::INJECT_CONTEXT, ClientCommand::InjectContext(request)),
            ReplyKind::State => (events::INJECT_STATE, ClientCommand::InjectState(request)),
        };

        if let Err(e) = self.emit(channel.as_ref(), &command).await {
            pending.cancel(&correlation_id);
            return Err(e);
        }

        let timeout = self.shared.config.correlation_timeout;
        pending
            .wait(&correlation_id, rx, timeout)
            .await
            .map_err(|failure| match failure {
                WaitFailure::TimedOut => {
                    warn!(%correlation_id, event, "correlated request timed out");
                    Error::CorrelationTimeout { event, timeout }
                }
                WaitFailure::Aborted => Error::CorrelationAborted(event),
            })
    }
}

/// Routes inbound events of a ready session until it ends.
async fn run_reactor(
    shared: Arc<Shared>,
    mut signals: mpsc::Receiver<TransportSignal>,
    early: Vec<InboundEvent>,
) {
    for event in early {
        shared.dispatcher.dispatch(event);
    }

    let mut shutdown = shared.shutdown_signal();
    let reason = loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(TransportSignal::Event(event)) => shared.dispatcher.dispatch(event),
                Some(TransportSignal::Disconnected(reason)) => break reason,
                Some(other) => debug!(?other, "ignoring lifecycle signal after ready"),
                None => break "transport closed".to_string(),
            },
            _ = shutdown.wait_for(|closed| *closed) => return,
        }
    };
    shared.terminate(reason).await;
}
