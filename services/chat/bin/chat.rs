//! Main Entrypoint for the Cognigy Chat Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Initializing logging.
//! 3. Connecting a session to the configured flow, retrying per the reconnect policy.
//! 4. Forwarding stdin lines to the flow and printing its replies.
//! 5. Replacing the session when the backend drops it or it expires, and closing it on exit.

use anyhow::Context;
use clap::Parser;
use cognigy_chat::{
    command::Line,
    config::Config,
    repl::{self, Exit},
};
use cognigy_client::Session;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Chat with a Cognigy flow from the terminal")]
struct Args {
    /// Flow to talk to; overrides COGNIGY_FLOW.
    #[arg(long)]
    flow: Option<String>,

    /// Flow language; overrides COGNIGY_LANGUAGE.
    #[arg(long)]
    language: Option<String>,

    /// Log level; overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<tracing::Level>,
}

/// Listens for the `Ctrl+C` signal to shut down the client.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Closing session...");
}

/// Builds a session with terminal handlers. Terminations are forwarded to the returned receiver.
fn new_session(config: &Config) -> (Session, mpsc::UnboundedReceiver<String>) {
    let session = Session::new(config.credentials(), config.session_config());
    let (tx, rx) = mpsc::unbounded_channel();

    session.on_output(|reply| {
        if let Some(text) = reply.text.filter(|text| !text.is_empty()) {
            println!("bot> {text}");
        }
        if let Some(data) = reply.data.filter(|data| !data.is_null()) {
            println!("bot> [data] {data}");
        }
    });
    session.on_error(|notice| eprintln!("error> {notice}"));
    session.on_final_ping(|ping| debug!(kind = ?ping.kind, "flow finished its turn"));
    session.on_termination(move |reason| {
        let _ = tx.send(reason);
    });
    (session, rx)
}

async fn connect(config: &Config) -> anyhow::Result<(Session, mpsc::UnboundedReceiver<String>)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (session, terminated) = new_session(config);
        match session.connect().await {
            Ok(()) => {
                info!(attempt, flow = %config.flow, "Session ready.");
                return Ok((session, terminated));
            }
            Err(e) if config.reconnect.allows(attempt) => {
                warn!(attempt, error = %e, "Connect failed. Retrying...");
                tokio::time::sleep(config.reconnect.interval).await;
            }
            Err(e) => return Err(e).context("Failed to connect session"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(flow) = args.flow {
        config.flow = flow;
    }
    if let Some(language) = args.language {
        config.language = language;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        endpoint = %config.endpoint,
        flow = %config.flow,
        language = %config.language,
        reconnect = config.reconnect.enabled,
        "Configuration loaded. Connecting..."
    );

    // --- 3. Chat Until Quit ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut replacements = 0;
    let mut pending: Option<Line> = None;
    loop {
        let (session, mut terminated) = connect(&config).await?;
        if let Some(line) = pending.take() {
            if let Err(e) = repl::run_line(&session, line).await {
                eprintln!("error> {e}");
            }
        }
        let exit = repl::chat(&session, &mut terminated, &mut lines, &mut shutdown).await;
        session.disconnect().await;

        match exit? {
            Exit::Quit => break,
            Exit::Expired(line) => {
                info!("Replacing expired session.");
                pending = Some(line);
            }
            Exit::Terminated(reason) => {
                replacements += 1;
                if !config.reconnect.allows(replacements) {
                    anyhow::bail!("Session terminated by the backend: {reason}");
                }
                warn!(%reason, replacements, "Session terminated. Reconnecting...");
                tokio::time::sleep(config.reconnect.interval).await;
            }
        }
    }

    info!("Session closed.");
    Ok(())
}
