//! Payload shapes emitted by the backend.

use serde::{Deserialize, Serialize, de::Error as _};
use serde_json::{Map, Value};

/// Discriminator of an `output` event.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Output,
    Error,
}

/// Raw body of an `output` event before it is split into reply or error.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AiOutput {
    #[serde(rename = "type")]
    pub kind: OutputType,
    #[serde(default)]
    pub data: Value,
}

/// An assistant reply produced by the flow.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct FlowOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Anything else the flow attached (`traceId`, `disableSensitiveLogging`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Structured error reported by the backend.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    /// Extracts the error object from an event payload.
    ///
    /// Accepts both `{error: {...}}` and the `{data: {error: {...}}}` wrapping some
    /// endpoints use.
    pub fn from_payload(payload: &Value) -> serde_json::Result<Self> {
        let inner = payload
            .get("error")
            .or_else(|| payload.get("data").and_then(|data| data.get("error")))
            .ok_or_else(|| serde_json::Error::missing_field("error"))?;
        Self::deserialize(inner)
    }
}

/// End-of-conversation marker with the backend's conversation summary.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct FinalPing {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub summary: Map<String, Value>,
}

/// Body of a `newContext` / `newState` reply.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedPayload {
    pub correlation_id: String,
    #[serde(default)]
    pub data: Value,
}
