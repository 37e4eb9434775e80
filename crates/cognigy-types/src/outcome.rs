//! Classification results for inbound events.

use crate::inbound::{ErrorResponse, FinalPing, FlowOutput};
use serde_json::Value;
use std::fmt;

/// A named event as delivered by the transport. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub payload: Value,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Where an [`ErrorNotice`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    /// An `error` event.
    Error,
    /// An `exception` event.
    Exception,
    /// An `output` event with `type: error`.
    Output,
    /// An inbound payload that could not be decoded.
    Decode,
}

impl fmt::Display for NoticeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NoticeSource::Error => "ERROR",
            NoticeSource::Exception => "EXCEPTION",
            NoticeSource::Output => "OUTPUT",
            NoticeSource::Decode => "DECODE",
        };
        f.write_str(label)
    }
}

/// A runtime error surfaced during an active session.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorNotice {
    pub source: NoticeSource,
    pub code: Option<i64>,
    pub message: String,
}

impl ErrorNotice {
    pub fn from_response(source: NoticeSource, response: ErrorResponse) -> Self {
        Self {
            source,
            code: response.code,
            message: response.message,
        }
    }

    /// A notice for a payload of `event` that failed structural decoding.
    pub fn decode(event: &str, err: impl fmt::Display) -> Self {
        Self {
            source: NoticeSource::Decode,
            code: None,
            message: format!("malformed `{event}` payload: {err}"),
        }
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{}] {} (code {})", self.source, self.message, code),
            None => write!(f, "[{}] {}", self.source, self.message),
        }
    }
}

/// Which injection a correlated reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Context,
    State,
}

/// A reply to an earlier `injectContext` / `injectState`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedReply {
    pub kind: ReplyKind,
    pub correlation_id: String,
    pub data: Value,
}

/// Exactly one of these is produced per inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeEnvelope {
    Output(FlowOutput),
    ErrorNotice(ErrorNotice),
    FinalSignal(FinalPing),
    CorrelatedReply(CorrelatedReply),
    Unrecognized { event: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_display_with_and_without_code() {
        let notice = ErrorNotice {
            source: NoticeSource::Output,
            code: Some(4),
            message: "bad flow".into(),
        };
        assert_eq!(notice.to_string(), "[OUTPUT] bad flow (code 4)");

        let decode = ErrorNotice::decode("output", "expected value");
        assert_eq!(decode.source, NoticeSource::Decode);
        assert_eq!(
            decode.to_string(),
            "[DECODE] malformed `output` payload: expected value"
        );
    }
}
