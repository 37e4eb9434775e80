//! Parsing of what the user types at the prompt.
//!
//! Plain text is a message for the flow. Lines starting with `/` are commands:
//!
//! - `/reset-state`, `/reset-context`
//! - `/reset-flow <flow> [language]`
//! - `/context <json>`, `/state <json>`
//! - `/quit`

use serde_json::Value;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `/{0}`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid JSON: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Empty,
    Message(String),
    ResetState,
    ResetContext,
    ResetFlow {
        flow: String,
        language: Option<String>,
    },
    InjectContext(Value),
    InjectState(Value),
    Quit,
}

pub fn parse(input: &str) -> Result<Line, CommandError> {
    let input = input.trim();
    let Some(command) = input.strip_prefix('/') else {
        return Ok(if input.is_empty() {
            Line::Empty
        } else {
            Line::Message(input.to_string())
        });
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "reset-state" => Ok(Line::ResetState),
        "reset-context" => Ok(Line::ResetContext),
        "reset-flow" => {
            let mut args = rest.split_whitespace();
            let flow = args
                .next()
                .ok_or(CommandError::Usage("/reset-flow <flow> [language]"))?;
            Ok(Line::ResetFlow {
                flow: flow.to_string(),
                language: args.next().map(str::to_string),
            })
        }
        "context" => json_arg(rest, "/context <json>").map(Line::InjectContext),
        "state" => json_arg(rest, "/state <json>").map(Line::InjectState),
        "quit" | "exit" => Ok(Line::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn json_arg(raw: &str, usage: &'static str) -> Result<Value, CommandError> {
    if raw.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    serde_json::from_str(raw).map_err(|e| CommandError::Json(e.to_string()))
}
