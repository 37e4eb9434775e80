//! The prompt loop for one session.

use crate::command::{self, Line};
use anyhow::Context;
use cognigy_client::{Error, Session};
use std::future::Future;
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;
use tracing::info;

/// Why a session's input loop ended.
#[derive(Debug, PartialEq)]
pub enum Exit {
    Quit,
    /// The backend dropped the session.
    Terminated(String),
    /// The session sat idle past its expiry. Carries the line that found it
    /// expired, to be replayed on the replacement session.
    Expired(Line),
}

pub async fn run_line(session: &Session, line: Line) -> Result<(), Error> {
    match line {
        Line::Empty | Line::Quit => {}
        Line::Message(text) => session.send_message(text).await?,
        Line::ResetState => session.reset_state().await?,
        Line::ResetContext => session.reset_context().await?,
        Line::ResetFlow { flow, language } => {
            let language = language.unwrap_or_else(|| session.config().language.clone());
            session.reset_flow(flow, language, None).await?
        }
        Line::InjectContext(payload) => {
            let context = session.inject_context(payload).await?;
            println!("context> {context}");
        }
        Line::InjectState(payload) => {
            let state = session.inject_state(payload).await?;
            println!("state> {state}");
        }
    }
    Ok(())
}

/// Reads lines into `session` until the user quits, the backend drops the
/// session, or a line arrives after the session expired.
pub async fn chat<R, S>(
    session: &Session,
    terminated: &mut mpsc::UnboundedReceiver<String>,
    lines: &mut Lines<R>,
    shutdown: &mut S,
) -> anyhow::Result<Exit>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()> + Unpin,
{
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    return Ok(Exit::Quit);
                };
                let line = match command::parse(&line) {
                    Ok(Line::Quit) => return Ok(Exit::Quit),
                    Ok(line) => line,
                    Err(e) => {
                        eprintln!("error> {e}");
                        continue;
                    }
                };
                if session.is_expired() {
                    info!("Session expired while idle.");
                    return Ok(Exit::Expired(line));
                }
                if let Err(e) = run_line(session, line).await {
                    eprintln!("error> {e}");
                }
            }
            Some(reason) = terminated.recv() => return Ok(Exit::Terminated(reason)),
            _ = &mut *shutdown => return Ok(Exit::Quit),
        }
    }
}
