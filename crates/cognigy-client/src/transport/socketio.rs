//! Socket.IO (Engine.IO v4) binding over `tokio-tungstenite`.
//!
//! Only the WebSocket transport is spoken; long-polling is never attempted.
//! Frames handled: Engine.IO `open`/`close`/`ping`/`pong`/`message`, and inside
//! messages Socket.IO `CONNECT`/`DISCONNECT`/`EVENT`/`CONNECT_ERROR`.

use super::{
    Channel, Connection, OpenRequest, Transport, TransportError, TransportKind, TransportSignal,
};
use async_trait::async_trait;
use cognigy_types::InboundEvent;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{Instrument, debug, error, info, warn};

const ENGINE_IO_VERSION: &str = "4";
const NAMESPACE_CONNECT: &str = "40";
const NAMESPACE_DISCONNECT: &str = "41";
const PONG: &str = "3";
const SIGNAL_BUFFER: usize = 128;
const OUTBOUND_BUFFER: usize = 128;

/// Opens Socket.IO connections over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct SocketIoTransport;

impl SocketIoTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn open(&self, request: OpenRequest) -> Result<Connection, TransportError> {
        if !request.options.transports.contains(&TransportKind::WebSocket) {
            return Err(TransportError::Unsupported(
                "the socket.io binding requires the websocket transport".to_string(),
            ));
        }
        let url = socket_url(&request)?;
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);

        let span = tracing::info_span!("socketio", endpoint = %request.endpoint);
        tokio::spawn(
            run_socket(url, request.options.connect_timeout, out_rx, signal_tx).instrument(span),
        );

        Ok(Connection {
            channel: std::sync::Arc::new(SocketIoChannel { tx: out_tx }),
            signals: signal_rx,
        })
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

struct SocketIoChannel {
    tx: mpsc::Sender<Outbound>,
}

#[async_trait]
impl Channel for SocketIoChannel {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let frame = encode_event(event, payload)?;
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
    }
}

/// Drives one socket until either side ends it, translating frames into signals.
async fn run_socket(
    url: Url,
    connect_timeout: Option<Duration>,
    mut out_rx: mpsc::Receiver<Outbound>,
    signals: mpsc::Sender<TransportSignal>,
) {
    let connecting = connect_async(url.to_string());
    let connected = match connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, connecting).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?limit, "socket connect timed out");
                let _ = signals.send(TransportSignal::ConnectTimeout).await;
                return;
            }
        },
        None => connecting.await,
    };
    let (ws_stream, _) = match connected {
        Ok(ok) => ok,
        Err(e) => {
            error!("socket connect failed: {}", e);
            let _ = signals.send(TransportSignal::ConnectError(e.to_string())).await;
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut joined = false;

    let reason = loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(frame.into())).await {
                        break format!("send failed: {e}");
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_tx.send(WsMessage::Text(NAMESPACE_DISCONNECT.into())).await;
                    let _ = ws_tx.close().await;
                    break "client disconnect".to_string();
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => match decode_packet(text.as_str()) {
                    Packet::Open => {
                        debug!("engine.io open received, joining namespace");
                        if let Err(e) = ws_tx.send(WsMessage::Text(NAMESPACE_CONNECT.into())).await {
                            break format!("send failed: {e}");
                        }
                    }
                    Packet::Ping => {
                        if let Err(e) = ws_tx.send(WsMessage::Text(PONG.into())).await {
                            break format!("send failed: {e}");
                        }
                    }
                    Packet::Connect => {
                        info!("socket connected");
                        joined = true;
                        if signals.send(TransportSignal::Connected).await.is_err() {
                            break "session dropped".to_string();
                        }
                    }
                    Packet::ConnectError(message) => break message,
                    Packet::Event(event) => {
                        if signals.send(TransportSignal::Event(event)).await.is_err() {
                            break "session dropped".to_string();
                        }
                    }
                    Packet::Disconnect => break "server disconnect".to_string(),
                    Packet::Close => break "transport close".to_string(),
                    Packet::Ignored => {}
                    Packet::Malformed(reason) => warn!(%reason, "dropping malformed frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => break format!("closed by server: {frame:?}"),
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        }
    };

    let signal = if joined {
        TransportSignal::Disconnected(reason)
    } else {
        TransportSignal::ConnectError(reason)
    };
    let _ = signals.send(signal).await;
}

/// Builds `ws(s)://host/<path>?EIO=4&transport=websocket&<query>`.
fn socket_url(request: &OpenRequest) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidEndpoint {
        endpoint: request.endpoint.clone(),
        reason,
    };
    let mut url = Url::parse(&request.endpoint).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to `{scheme}`")))?;
    url.set_path(&request.options.path);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("EIO", ENGINE_IO_VERSION);
        pairs.append_pair("transport", "websocket");
        for (key, value) in &request.query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

#[derive(Debug, PartialEq)]
enum Packet {
    Open,
    Close,
    Ping,
    Connect,
    Disconnect,
    Event(InboundEvent),
    ConnectError(String),
    Ignored,
    Malformed(String),
}

fn decode_packet(frame: &str) -> Packet {
    let mut chars = frame.chars();
    match chars.next() {
        Some('0') => Packet::Open,
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') | Some('6') => Packet::Ignored,
        Some('4') => decode_socket_packet(chars.as_str()),
        _ => Packet::Malformed(format!("unknown engine.io frame `{frame}`")),
    }
}

fn decode_socket_packet(body: &str) -> Packet {
    let mut chars = body.chars();
    match chars.next() {
        Some('0') => Packet::Connect,
        Some('1') => Packet::Disconnect,
        Some('2') => match decode_event(chars.as_str()) {
            Ok(event) => Packet::Event(event),
            Err(reason) => Packet::Malformed(reason),
        },
        Some('4') => Packet::ConnectError(connect_error_message(strip_namespace(chars.as_str()))),
        _ => Packet::Ignored,
    }
}

/// Drops an optional `/namespace,` prefix.
fn strip_namespace(body: &str) -> &str {
    match body.strip_prefix('/') {
        Some(rest) => rest.split_once(',').map_or("", |(_, tail)| tail),
        None => body,
    }
}

fn decode_event(body: &str) -> Result<InboundEvent, String> {
    let body = strip_namespace(body).trim_start_matches(|c: char| c.is_ascii_digit());
    let args: Vec<Value> = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        Some(other) => return Err(format!("event name is not a string: {other}")),
        None => return Err("empty event frame".to_string()),
    };
    Ok(InboundEvent::new(name, args.next().unwrap_or(Value::Null)))
}

fn connect_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn encode_event(event: &str, payload: Value) -> Result<String, TransportError> {
    Ok(format!("42{}", serde_json::to_string(&json!([event, payload]))?))
}
