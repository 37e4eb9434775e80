//! Pending correlated requests, keyed by a per-request id.

use cognigy_types::{CorrelatedReply, ReplyKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// The session closed before a reply arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Aborted;

type Slot = oneshot::Sender<Result<Value, Aborted>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Value, Aborted>>;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Resolved,
    /// No request with that id is waiting (already answered, timed out, or never issued).
    Unknown,
    /// The id is waiting, but for the other kind of reply. The request stays pending.
    KindMismatch { expected: ReplyKind },
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitFailure {
    TimedOut,
    Aborted,
}

#[derive(Default)]
struct Slots {
    closed: bool,
    waiting: HashMap<String, (ReplyKind, Slot)>,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    slots: Mutex<Slots>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a slot under a fresh id. After [`abort_all`](Self::abort_all) the
    /// returned receiver is already resolved as aborted.
    pub fn register(&self, kind: ReplyKind) -> (String, ReplyReceiver) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        if slots.closed {
            let _ = tx.send(Err(Aborted));
        } else {
            slots.waiting.insert(id.clone(), (kind, tx));
        }
        (id, rx)
    }

    /// Completes exactly the slot matching the reply's id.
    pub fn resolve(&self, reply: CorrelatedReply) -> Resolution {
        let mut slots = self.lock();
        let expected = match slots.waiting.get(&reply.correlation_id) {
            None => return Resolution::Unknown,
            Some((kind, _)) => *kind,
        };
        if expected != reply.kind {
            return Resolution::KindMismatch { expected };
        }
        if let Some((_, tx)) = slots.waiting.remove(&reply.correlation_id) {
            let _ = tx.send(Ok(reply.data));
        }
        Resolution::Resolved
    }

    /// Drops a slot. Returns `false` if it had already been resolved.
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().waiting.remove(id).is_some()
    }

    /// Resolves every waiting slot as aborted and refuses new ones.
    pub fn abort_all(&self) -> usize {
        let mut slots = self.lock();
        slots.closed = true;
        let drained: Vec<_> = slots.waiting.drain().collect();
        let count = drained.len();
        for (_, (_, tx)) in drained {
            let _ = tx.send(Err(Aborted));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Waits for the slot `id`, racing the reply against `timeout`.
    ///
    /// If the timer fires while the reply is being delivered, the reply wins.
    pub async fn wait(
        &self,
        id: &str,
        mut rx: ReplyReceiver,
        timeout: Duration,
    ) -> Result<Value, WaitFailure> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(Aborted))) | Ok(Err(_)) => Err(WaitFailure::Aborted),
            Err(_) if self.cancel(id) => Err(WaitFailure::TimedOut),
            Err(_) => match rx.try_recv() {
                Ok(Ok(value)) => Ok(value),
                _ => Err(WaitFailure::Aborted),
            },
        }
    }
}
