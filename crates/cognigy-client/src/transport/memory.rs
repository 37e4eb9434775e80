//! In-process transport for tests.
//!
//! [`MemoryTransport`] hands every opened connection to the paired
//! [`MemoryServer`] as a [`MemoryPeer`], which plays the backend: it pushes
//! signals into the session and observes everything the session emits.

use super::{Channel, Connection, OpenRequest, Transport, TransportError, TransportSignal};
use async_trait::async_trait;
use cognigy_types::{InboundEvent, events};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

const SIGNAL_BUFFER: usize = 64;

/// An event the session put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub event: String,
    pub payload: Value,
}

pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    opened: Arc<AtomicUsize>,
}

pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    opened: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicUsize::new(0));
        (
            MemoryTransport {
                peers: tx,
                opened: opened.clone(),
            },
            MemoryServer { peers: rx, opened },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, request: OpenRequest) -> Result<Connection, TransportError> {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (emit_tx, emit_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MemoryPeer {
            request,
            signals: signal_tx,
            emitted: emit_rx,
            closed: closed.clone(),
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ChannelClosed)?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Connection {
            channel: Arc::new(MemoryChannel {
                emitted: emit_tx,
                closed,
            }),
            signals: signal_rx,
        })
    }
}

impl MemoryServer {
    /// Waits for the next connection the session opens.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Number of connections opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct MemoryChannel {
    emitted: mpsc::UnboundedSender<Emitted>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.emitted
            .send(Emitted {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// The backend side of one in-memory connection.
pub struct MemoryPeer {
    pub request: OpenRequest,
    signals: mpsc::Sender<TransportSignal>,
    emitted: mpsc::UnboundedReceiver<Emitted>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Delivers a signal to the session. Returns `false` once the session stopped listening.
    pub async fn signal(&self, signal: TransportSignal) -> bool {
        self.signals.send(signal).await.is_ok()
    }

    /// Delivers a named backend event.
    pub async fn send_event(&self, name: &str, payload: Value) -> bool {
        self.signal(TransportSignal::Event(InboundEvent::new(name, payload)))
            .await
    }

    /// Waits for the next event emitted by the session.
    pub async fn next_emitted(&mut self) -> Option<Emitted> {
        self.emitted.recv().await
    }

    /// Returns an already-emitted event without waiting.
    pub fn try_emitted(&mut self) -> Option<Emitted> {
        self.emitted.try_recv().ok()
    }

    /// Whether the session closed its channel.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Plays a successful two-phase handshake and returns the `init` payload.
    pub async fn accept_handshake(&mut self) -> Option<Value> {
        self.signal(TransportSignal::Connected).await;
        let init = self.next_emitted().await?;
        if init.event != events::INIT {
            return None;
        }
        self.send_event(events::INIT_RESPONSE, Value::Null).await;
        Some(init.payload)
    }
}
