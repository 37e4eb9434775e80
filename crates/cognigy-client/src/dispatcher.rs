//! Inbound event classification and routing.
//!
//! [`classify`] turns every inbound event into exactly one [`OutcomeEnvelope`].
//! The [`Dispatcher`] then routes it: replies and final pings go to the
//! registered handler for their kind, error notices go to the error handler
//! and always to the log, correlated replies complete their pending request.

use crate::correlation::{PendingTable, Resolution};
use cognigy_types::{
    AiOutput, CorrelatedPayload, CorrelatedReply, ErrorNotice, ErrorResponse, FinalPing,
    FlowOutput, InboundEvent, NoticeSource, OutcomeEnvelope, OutputType, ReplyKind, events,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

pub type OutputHandler = Arc<dyn Fn(FlowOutput) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(ErrorNotice) + Send + Sync>;
pub type FinalPingHandler = Arc<dyn Fn(FinalPing) + Send + Sync>;
pub type TerminationHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Classifies one inbound event.
pub fn classify(event: InboundEvent) -> OutcomeEnvelope {
    let InboundEvent { name, payload } = event;
    match name.as_str() {
        events::OUTPUT => classify_output(payload),
        events::EXCEPTION => error_notice(NoticeSource::Exception, &name, &payload),
        events::ERROR => error_notice(NoticeSource::Error, &name, &payload),
        events::FINAL_PING => classify_final_ping(payload),
        events::NEW_CONTEXT => correlated(ReplyKind::Context, &name, payload),
        events::NEW_STATE => correlated(ReplyKind::State, &name, payload),
        _ => OutcomeEnvelope::Unrecognized { event: name },
    }
}

fn classify_output(payload: Value) -> OutcomeEnvelope {
    let output: AiOutput = match serde_json::from_value(payload) {
        Ok(output) => output,
        Err(e) => return OutcomeEnvelope::ErrorNotice(ErrorNotice::decode(events::OUTPUT, e)),
    };
    match output.kind {
        OutputType::Error => error_notice(NoticeSource::Output, events::OUTPUT, &output.data),
        OutputType::Output if output.data.is_null() => {
            OutcomeEnvelope::Output(FlowOutput::default())
        }
        OutputType::Output => match serde_json::from_value(output.data) {
            Ok(reply) => OutcomeEnvelope::Output(reply),
            Err(e) => OutcomeEnvelope::ErrorNotice(ErrorNotice::decode(events::OUTPUT, e)),
        },
    }
}

fn error_notice(source: NoticeSource, event: &str, payload: &Value) -> OutcomeEnvelope {
    let notice = match ErrorResponse::from_payload(payload) {
        Ok(response) => ErrorNotice::from_response(source, response),
        Err(e) => ErrorNotice::decode(event, e),
    };
    OutcomeEnvelope::ErrorNotice(notice)
}

fn classify_final_ping(payload: Value) -> OutcomeEnvelope {
    if payload.is_null() {
        return OutcomeEnvelope::FinalSignal(FinalPing::default());
    }
    match serde_json::from_value(payload) {
        Ok(ping) => OutcomeEnvelope::FinalSignal(ping),
        Err(e) => OutcomeEnvelope::ErrorNotice(ErrorNotice::decode(events::FINAL_PING, e)),
    }
}

fn correlated(kind: ReplyKind, event: &str, payload: Value) -> OutcomeEnvelope {
    match serde_json::from_value::<CorrelatedPayload>(payload) {
        Ok(reply) => OutcomeEnvelope::CorrelatedReply(CorrelatedReply {
            kind,
            correlation_id: reply.correlation_id,
            data: reply.data,
        }),
        Err(e) => OutcomeEnvelope::ErrorNotice(ErrorNotice::decode(event, e)),
    }
}

/// One handler per outcome kind; registering again replaces the previous one.
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub output: Option<OutputHandler>,
    pub error: Option<ErrorHandler>,
    pub final_ping: Option<FinalPingHandler>,
    pub termination: Option<TerminationHandler>,
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    handlers: Mutex<Handlers>,
    pending: PendingTable,
}

impl Dispatcher {
    pub fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn dispatch(&self, event: InboundEvent) {
        match classify(event) {
            OutcomeEnvelope::Output(reply) => {
                info!(text = ?reply.text, "output received");
                let handler = self.handlers().output.clone();
                match handler {
                    Some(handler) => handler(reply),
                    None => debug!("no output handler registered; dropping reply"),
                }
            }
            OutcomeEnvelope::ErrorNotice(notice) => {
                error!(source = %notice.source, code = ?notice.code, "{}", notice.message);
                let handler = self.handlers().error.clone();
                if let Some(handler) = handler {
                    handler(notice);
                }
            }
            OutcomeEnvelope::FinalSignal(ping) => {
                info!(kind = ?ping.kind, "final ping received");
                let handler = self.handlers().final_ping.clone();
                if let Some(handler) = handler {
                    handler(ping);
                }
            }
            OutcomeEnvelope::CorrelatedReply(reply) => {
                let correlation_id = reply.correlation_id.clone();
                let kind = reply.kind;
                match self.pending.resolve(reply) {
                    Resolution::Resolved => debug!(%correlation_id, ?kind, "correlated reply resolved"),
                    Resolution::Unknown => {
                        warn!(%correlation_id, ?kind, "no pending request for reply; dropping")
                    }
                    Resolution::KindMismatch { expected } => warn!(
                        %correlation_id,
                        ?kind,
                        ?expected,
                        "reply kind does not match pending request; dropping"
                    ),
                }
            }
            OutcomeEnvelope::Unrecognized { event } => {
                warn!(%event, "ignoring unrecognized event");
            }
        }
    }

    /// Reports a transport-level termination to the registered handler.
    pub fn notify_termination(&self, reason: String) {
        let handler = self.handlers().termination.clone();
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}
