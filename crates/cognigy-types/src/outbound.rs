//! Commands sent from the client to the backend.

use crate::events;
use serde::Serialize;
use serde_json::Value;

/// Payload of the `init` command, the second phase of the handshake.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub flow: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(rename = "passthroughIP", skip_serializing_if = "Option::is_none")]
    pub passthrough_ip: Option<String>,
    pub reset_state: bool,
    pub reset_context: bool,
}

/// The event a user turn is submitted under. Both names mean "process this input";
/// which one a backend listens to depends on its endpoint flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputEvent {
    #[default]
    ProcessInput,
    Input,
}

impl InputEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            InputEvent::ProcessInput => events::PROCESS_INPUT,
            InputEvent::Input => events::INPUT,
        }
    }
}

/// A single user turn.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    #[serde(rename = "URLToken")]
    pub url_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub source: String,
    #[serde(rename = "passthroughIP", skip_serializing_if = "Option::is_none")]
    pub passthrough_ip: Option<String>,
    pub reload_flow: bool,
    pub reset_flow: bool,
    pub reset_state: bool,
    pub reset_context: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Switches the conversation to another flow.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResetFlowRequest {
    pub flow_id: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Identifies the conversation a state/context reset applies to.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A correlated injection; the backend echoes `correlation_id` in its reply.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InjectRequest {
    pub correlation_id: String,
    pub data: Value,
}

/// Every command the client can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Init(InitRequest),
    Input {
        event: InputEvent,
        message: InputMessage,
    },
    ResetFlow(ResetFlowRequest),
    ResetState(SessionRef),
    ResetContext(SessionRef),
    InjectContext(InjectRequest),
    InjectState(InjectRequest),
}

impl ClientCommand {
    /// The socket event this command is emitted as.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientCommand::Init(_) => events::INIT,
            ClientCommand::Input { event, .. } => event.as_str(),
            ClientCommand::ResetFlow(_) => events::RESET_FLOW,
            ClientCommand::ResetState(_) => events::RESET_STATE,
            ClientCommand::ResetContext(_) => events::RESET_CONTEXT,
            ClientCommand::InjectContext(_) => events::INJECT_CONTEXT,
            ClientCommand::InjectState(_) => events::INJECT_STATE,
        }
    }

    /// Serializes the command body.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            ClientCommand::Init(req) => serde_json::to_value(req),
            ClientCommand::Input { message, .. } => serde_json::to_value(message),
            ClientCommand::ResetFlow(req) => serde_json::to_value(req),
            ClientCommand::ResetState(target) | ClientCommand::ResetContext(target) => {
                serde_json::to_value(target)
            }
            ClientCommand::InjectContext(req) | ClientCommand::InjectState(req) => {
                serde_json::to_value(req)
            }
        }
    }
}
