//! Two-phase session startup.
//!
//! Phase one opens the transport with the token in the query and waits for
//! `connected`. Phase two emits `init` and waits for `initResponse`. An
//! `exception` in either phase aborts, as does a `disconnect()` issued meanwhile.

use crate::config::{EarlyEvents, HandshakeMode, SessionConfig};
use crate::credentials::Token;
use crate::error::Error;
use crate::session::Shared;
use crate::transport::{Channel, Connection, OpenRequest, Transport, TransportSignal};
use cognigy_types::{ClientCommand, ErrorResponse, InboundEvent, InitRequest, events};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument};

/// A connection that finished its handshake.
pub(crate) struct Established {
    pub channel: Arc<dyn Channel>,
    pub signals: mpsc::Receiver<TransportSignal>,
    /// Events kept under [`EarlyEvents::Buffer`], in arrival order.
    pub early: Vec<InboundEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Transport,
    Init,
}

impl Phase {
    fn fail(self, reason: impl Into<String>) -> Error {
        match self {
            Phase::Transport => Error::Connection(reason.into()),
            Phase::Init => Error::Initialization(reason.into()),
        }
    }

    fn timed_out(self, limit: Duration) -> Error {
        match self {
            Phase::Transport => Error::Connection(format!("connect timed out after {limit:?}")),
            Phase::Init => Error::Initialization(format!("no initResponse within {limit:?}")),
        }
    }
}

/// Query parameters sent with the transport handshake.
pub(crate) fn open_request(config: &SessionConfig, token: &Token) -> OpenRequest {
    OpenRequest {
        endpoint: config.endpoint.clone(),
        query: vec![
            ("token".to_string(), token.expose().to_string()),
            ("upgrade".to_string(), "false".to_string()),
        ],
        options: config.protocol.clone(),
    }
}

pub(crate) fn init_request(config: &SessionConfig) -> InitRequest {
    InitRequest {
        flow: config.flow.clone(),
        language: config.language.clone(),
        version: config.version,
        passthrough_ip: config.passthrough_ip.clone(),
        reset_state: config.reset_state,
        reset_context: config.reset_context,
    }
}

/// Runs both phases. On failure the channel is closed before returning; the
/// caller owns the state rollback.
#[instrument(skip_all, fields(endpoint = %shared.config.endpoint, flow = %shared.config.flow))]
pub(crate) async fn perform(
    shared: &Shared,
    transport: &dyn Transport,
    token: &Token,
) -> Result<Established, Error> {
    let config = &shared.config;
    let Connection {
        channel,
        mut signals,
    } = transport
        .open(open_request(config, token))
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    let mut shutdown = shared.shutdown_signal();
    let mut early = Vec::new();

    let outcome = run_phases(
        shared,
        channel.as_ref(),
        &mut signals,
        &mut shutdown,
        &mut early,
    )
    .await;

    match outcome {
        Ok(()) => Ok(Established {
            channel,
            signals,
            early,
        }),
        Err(e) => {
            channel.close().await;
            Err(e)
        }
    }
}

async fn run_phases(
    shared: &Shared,
    channel: &dyn Channel,
    signals: &mut mpsc::Receiver<TransportSignal>,
    shutdown: &mut watch::Receiver<bool>,
    early: &mut Vec<InboundEvent>,
) -> Result<(), Error> {
    let config = &shared.config;
    wait_for(
        Phase::Transport,
        signals,
        shutdown,
        config.connect_timeout,
        config.early_events,
        early,
    )
    .await?;
    shared.lock_state().transport_connected()?;
    info!("transport connected");

    if config.handshake == HandshakeMode::SinglePhase {
        return Ok(());
    }
    let init = ClientCommand::Init(init_request(config));
    channel
        .emit(init.event_name(), init.to_payload()?)
        .await
        .map_err(|e| Error::Initialization(e.to_string()))?;
    wait_for(
        Phase::Init,
        signals,
        shutdown,
        config.init_timeout,
        config.early_events,
        early,
    )
    .await?;
    info!("init acknowledged");
    Ok(())
}

/// Waits for the signal that completes `phase`.
async fn wait_for(
    phase: Phase,
    signals: &mut mpsc::Receiver<TransportSignal>,
    shutdown: &mut watch::Receiver<bool>,
    timeout: Option<Duration>,
    policy: EarlyEvents,
    early: &mut Vec<InboundEvent>,
) -> Result<(), Error> {
    let wait = async {
        loop {
            let signal = tokio::select! {
                signal = signals.recv() => signal,
                _ = shutdown.wait_for(|closed| *closed) => return Err(Error::Closed),
            };
            let Some(signal) = signal else {
                return Err(phase.fail("transport went away"));
            };
            match signal {
                TransportSignal::Connected if phase == Phase::Transport => return Ok(()),
                TransportSignal::ConnectError(reason) if phase == Phase::Transport => {
                    return Err(Error::Connection(reason));
                }
                TransportSignal::ConnectTimeout if phase == Phase::Transport => {
                    return Err(Error::Connection("transport reported connect timeout".into()));
                }
                TransportSignal::Disconnected(reason) => {
                    return Err(phase.fail(format!("disconnected: {reason}")));
                }
                TransportSignal::Event(event)
                    if phase == Phase::Init && event.name == events::INIT_RESPONSE =>
                {
                    return Ok(());
                }
                TransportSignal::Event(event) if event.name == events::EXCEPTION => {
                    let message = ErrorResponse::from_payload(&event.payload)
                        .map(|err| err.message)
                        .unwrap_or_else(|_| event.payload.to_string());
                    return Err(phase.fail(format!("backend exception: {message}")));
                }
                TransportSignal::Event(event) => match policy {
                    EarlyEvents::Drop => debug!(event = %event.name, "dropping event received before ready"),
                    EarlyEvents::Buffer => early.push(event),
                },
                other => debug!(?other, ?phase, "ignoring lifecycle signal"),
            }
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| phase.timed_out(limit))?,
        None => wait.await,
    }
}
