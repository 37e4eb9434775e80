use cognigy_client::transport::{MemoryPeer, MemoryServer, MemoryTransport};
use cognigy_client::{
    ConnectionState, Credentials, EarlyEvents, Error, HandshakeMode, Session, SessionConfig,
    TransportSignal,
};
use cognigy_types::{ErrorNotice, FlowOutput, NoticeSource};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "https://endpoint.example.com";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn config() -> SessionConfig {
    SessionConfig::new(ENDPOINT)
        .with_flow("main-flow", "en-US")
        .with_identity("user-1", "session-1")
}

fn session(config: SessionConfig) -> (Session, MemoryServer) {
    init_tracing();
    let (transport, server) = MemoryTransport::pair();
    let session = Session::with_transport(
        Credentials::with_token(ENDPOINT, "tok"),
        config,
        Arc::new(transport),
    );
    (session, server)
}

/// A session that completed the two-phase handshake, and the backend side of it.
async fn ready(config: SessionConfig) -> (Session, MemoryPeer) {
    let (session, mut server) = session(config);
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.accept_handshake().await.unwrap();
    connecting.await.unwrap().unwrap();
    (session, peer)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler was not called")
        .expect("handler channel closed")
}

#[tokio::test]
async fn identity_credentials_are_exchanged_for_the_socket_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/loginDevice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "T"})))
        .expect(1)
        .mount(&server)
        .await;

    let (transport, mut backend) = MemoryTransport::pair();
    let session = Session::with_transport(
        Credentials::with_identity(server.uri(), "u", "k", "c"),
        config(),
        Arc::new(transport),
    );
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });

    let mut peer = backend.accept().await.unwrap();
    assert_eq!(peer.request.query_param("token"), Some("T"));
    assert_eq!(peer.request.query_param("upgrade"), Some("false"));
    peer.accept_handshake().await.unwrap();
    connecting.await.unwrap().unwrap();

    assert_eq!(session.token().unwrap().expose(), "T");
}

#[tokio::test]
async fn disconnect_during_credential_exchange_opens_no_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/loginDevice"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"token": "T"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let (transport, backend) = MemoryTransport::pair();
    let session = Session::with_transport(
        Credentials::with_identity(server.uri(), "u", "k", "c"),
        config(),
        Arc::new(transport),
    );
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.disconnect().await;

    assert!(matches!(connecting.await.unwrap(), Err(Error::Closed)));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn handshake_sends_init_and_reaches_ready() {
    let (session, mut server) = session(config().with_version(3));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    let init = peer.accept_handshake().await.unwrap();
    connecting.await.unwrap().unwrap();

    assert_eq!(init["flow"], "main-flow");
    assert_eq!(init["language"], "en-US");
    assert_eq!(init["version"], 3);
    assert_eq!(init["resetState"], false);
    assert_eq!(session.state(), ConnectionState::Ready);
    assert!(session.is_connected());
    assert!(!session.is_expired());
}

#[tokio::test]
async fn connect_error_leaves_session_disconnected() {
    let (session, mut server) = session(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::ConnectError("refused".into()))
        .await;

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection(reason) if reason == "refused"));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn exception_during_init_fails_the_handshake() {
    let (session, mut server) = session(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::Connected).await;
    assert_eq!(peer.next_emitted().await.unwrap().event, "init");
    peer.send_event(
        "exception",
        json!({"error": {"code": 3, "message": "flow not found"}}),
    )
    .await;

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Initialization(_)));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn init_response_before_connected_does_not_complete_handshake() {
    let (session, mut server) = session(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.send_event("initResponse", Value::Null).await;
    peer.signal(TransportSignal::Connected).await;

    assert_eq!(peer.next_emitted().await.unwrap().event, "init");
    tokio::task::yield_now().await;
    assert_eq!(session.state(), ConnectionState::Initializing);
    assert!(!connecting.is_finished());

    peer.send_event("initResponse", Value::Null).await;
    connecting.await.unwrap().unwrap();
    assert_eq!(session.state(), ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_is_a_connection_error() {
    let (session, mut server) =
        session(config().with_connect_timeout(Duration::from_secs(5)));
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    // Accepted but never answered.
    let peer = server.accept().await.unwrap();

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn failed_session_can_connect_again() {
    let (session, mut server) = session(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::ConnectTimeout).await;
    assert!(connecting.await.unwrap().is_err());

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.accept_handshake().await.unwrap();
    connecting.await.unwrap().unwrap();
    assert_eq!(server.open_count(), 2);
    assert!(session.is_connected());
}

#[tokio::test]
async fn commands_before_connect_fail_without_io() {
    let (session, server) = session(config());

    assert!(matches!(
        session.send_message("hi").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        session.reset_state().await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        session.inject_context(json!({})).await,
        Err(Error::NotConnected)
    ));
    assert_eq!(server.open_count(), 0);
}

#[tokio::test]
async fn send_message_emits_process_input() {
    let (session, mut peer) = ready(config()).await;

    session
        .send_message_with_data("hello", &json!({"channel": "web"}))
        .await
        .unwrap();
    let emitted = peer.next_emitted().await.unwrap();
    assert_eq!(emitted.event, "processInput");
    assert_eq!(emitted.payload["text"], "hello");
    assert_eq!(emitted.payload["data"], json!({"channel": "web"}));
    assert_eq!(emitted.payload["URLToken"], "tok");
    assert_eq!(emitted.payload["userId"], "user-1");
    assert_eq!(emitted.payload["sessionId"], "session-1");
    assert_eq!(emitted.payload["source"], "device");

    session.send_message("plain").await.unwrap();
    let emitted = peer.next_emitted().await.unwrap();
    assert!(emitted.payload.get("data").is_none());
}

#[tokio::test]
async fn reset_commands_use_their_event_names() {
    let (session, mut peer) = ready(config()).await;

    session.reset_flow("other-flow", "de-DE", None).await.unwrap();
    let emitted = peer.next_emitted().await.unwrap();
    assert_eq!(emitted.event, "resetFlow");
    assert_eq!(
        emitted.payload,
        json!({"flowId": "other-flow", "language": "de-DE"})
    );

    session.reset_state().await.unwrap();
    let emitted = peer.next_emitted().await.unwrap();
    assert_eq!(emitted.event, "resetState");
    assert_eq!(
        emitted.payload,
        json!({"userId": "user-1", "sessionId": "session-1"})
    );

    session.reset_context().await.unwrap();
    assert_eq!(peer.next_emitted().await.unwrap().event, "resetContext");
}

#[tokio::test]
async fn output_and_final_ping_reach_their_handlers() {
    let (session, peer) = ready(config()).await;
    let (out_tx, mut outputs) = mpsc::unbounded_channel::<FlowOutput>();
    let (ping_tx, mut pings) = mpsc::unbounded_channel();
    session.on_output(move |reply| {
        let _ = out_tx.send(reply);
    });
    session.on_final_ping(move |ping| {
        let _ = ping_tx.send(ping);
    });

    peer.send_event(
        "output",
        json!({"type": "output", "data": {"text": "Hi there", "data": null}}),
    )
    .await;
    peer.send_event("finalPing", json!({"type": "regular"}))
        .await;

    assert_eq!(recv(&mut outputs).await.text.as_deref(), Some("Hi there"));
    assert_eq!(recv(&mut pings).await.kind.as_deref(), Some("regular"));
}

#[tokio::test]
async fn output_error_is_reported_and_session_stays_ready() {
    let (session, peer) = ready(config()).await;
    let (tx, mut notices) = mpsc::unbounded_channel::<ErrorNotice>();
    session.on_error(move |notice| {
        let _ = tx.send(notice);
    });

    peer.send_event(
        "output",
        json!({"type": "error", "data": {"error": {"code": 4, "message": "bad flow"}}}),
    )
    .await;

    let notice = recv(&mut notices).await;
    assert_eq!(notice.source, NoticeSource::Output);
    assert_eq!(notice.code, Some(4));
    assert_eq!(notice.message, "bad flow");
    assert!(notices.try_recv().is_err());
    assert_eq!(session.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn concurrent_injections_resolve_by_correlation_id() {
    let (session, mut peer) = ready(config()).await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.inject_context(json!({"n": 1})).await }
    });
    let a = peer.next_emitted().await.unwrap();
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.inject_context(json!({"n": 2})).await }
    });
    let b = peer.next_emitted().await.unwrap();
    assert_eq!(a.event, "injectContext");
    assert_eq!(a.payload["data"], json!({"n": 1}));
    assert_ne!(a.payload["correlationId"], b.payload["correlationId"]);

    // Replies come back in reverse order.
    peer.send_event(
        "newContext",
        json!({"correlationId": b.payload["correlationId"], "data": "second"}),
    )
    .await;
    peer.send_event(
        "newContext",
        json!({"correlationId": a.payload["correlationId"], "data": "first"}),
    )
    .await;

    assert_eq!(first.await.unwrap().unwrap(), json!("first"));
    assert_eq!(second.await.unwrap().unwrap(), json!("second"));
}

#[tokio::test]
async fn inject_state_ignores_replies_for_other_requests() {
    let (session, mut peer) = ready(config()).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.inject_state(json!({"step": 2})).await }
    });
    let emitted = peer.next_emitted().await.unwrap();
    assert_eq!(emitted.event, "injectState");

    peer.send_event(
        "newState",
        json!({"correlationId": "not-mine", "data": "wrong"}),
    )
    .await;
    // Same id, wrong reply kind.
    peer.send_event(
        "newContext",
        json!({"correlationId": emitted.payload["correlationId"], "data": "wrong"}),
    )
    .await;
    peer.send_event(
        "newState",
        json!({"correlationId": emitted.payload["correlationId"], "data": {"step": 2}}),
    )
    .await;

    assert_eq!(pending.await.unwrap().unwrap(), json!({"step": 2}));
}

#[tokio::test(start_paused = true)]
async fn unanswered_injection_times_out() {
    let (session, mut peer) =
        ready(config().with_correlation_timeout(Duration::from_millis(200))).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.inject_state(json!({})).await }
    });
    let emitted = peer.next_emitted().await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::CorrelationTimeout { event: "injectState", timeout } if timeout == Duration::from_millis(200)
    ));

    // A late reply is dropped and the session keeps working.
    peer.send_event(
        "newState",
        json!({"correlationId": emitted.payload["correlationId"], "data": 1}),
    )
    .await;
    session.send_message("still here").await.unwrap();
}

#[tokio::test]
async fn disconnect_aborts_waiting_injection() {
    let (session, mut peer) = ready(config()).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.inject_context(json!({})).await }
    });
    peer.next_emitted().await.unwrap();
    session.disconnect().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::CorrelationAborted("injectContext")));
}

#[tokio::test]
async fn disconnect_is_idempotent_and_final() {
    let (session, mut peer) = ready(config()).await;
    let (tx, mut terminations) = mpsc::unbounded_channel::<String>();
    session.on_termination(move |reason| {
        let _ = tx.send(reason);
    });

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);

    assert!(matches!(
        session.send_message("hi").await,
        Err(Error::NotConnected)
    ));
    assert!(peer.try_emitted().is_none());
    assert!(matches!(session.connect().await, Err(Error::Closed)));
    assert!(terminations.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_during_handshake_interrupts_connect() {
    let (session, mut server) = session(config());
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::Connected).await;
    peer.next_emitted().await.unwrap();

    session.disconnect().await;

    assert!(matches!(connecting.await.unwrap(), Err(Error::Closed)));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
}

#[tokio::test]
async fn transport_loss_terminates_once() {
    let (session, peer) = ready(config()).await;
    let (tx, mut terminations) = mpsc::unbounded_channel::<String>();
    session.on_termination(move |reason| {
        let _ = tx.send(reason);
    });

    peer.signal(TransportSignal::Disconnected("transport close".into()))
        .await;

    assert_eq!(recv(&mut terminations).await, "transport close");
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
    assert!(matches!(
        session.send_message("hi").await,
        Err(Error::NotConnected)
    ));

    session.disconnect().await;
    drop(peer);
    tokio::task::yield_now().await;
    assert!(terminations.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_but_stays_ready() {
    let (session, mut peer) = ready(config().with_expiry(Duration::from_secs(30))).await;

    tokio::time::advance(Duration::from_secs(20)).await;
    session.send_message("keep alive").await.unwrap();
    peer.next_emitted().await.unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(!session.is_expired());

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(session.is_expired());
    assert_eq!(session.state(), ConnectionState::Ready);
    assert!(matches!(
        session.send_message("too late").await,
        Err(Error::NotConnected)
    ));
    assert!(peer.try_emitted().is_none());
}

#[tokio::test]
async fn single_phase_skips_init() {
    let (session, mut server) = session(config().with_handshake(HandshakeMode::SinglePhase));
    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::Connected).await;
    connecting.await.unwrap().unwrap();

    assert!(session.is_connected());
    assert!(peer.try_emitted().is_none());
}

#[tokio::test]
async fn buffered_early_events_are_dispatched_after_ready() {
    let (session, mut server) = session(config().with_early_events(EarlyEvents::Buffer));
    let (tx, mut outputs) = mpsc::unbounded_channel::<FlowOutput>();
    session.on_output(move |reply| {
        let _ = tx.send(reply);
    });

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::Connected).await;
    peer.send_event("output", json!({"type": "output", "data": {"text": "welcome"}}))
        .await;
    assert_eq!(peer.next_emitted().await.unwrap().event, "init");
    peer.send_event("initResponse", Value::Null).await;
    connecting.await.unwrap().unwrap();

    assert_eq!(recv(&mut outputs).await.text.as_deref(), Some("welcome"));
}

#[tokio::test]
async fn early_events_are_dropped_by_default() {
    let (session, mut server) = session(config());
    let (tx, mut outputs) = mpsc::unbounded_channel::<FlowOutput>();
    session.on_output(move |reply| {
        let _ = tx.send(reply);
    });

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = server.accept().await.unwrap();
    peer.signal(TransportSignal::Connected).await;
    peer.send_event("output", json!({"type": "output", "data": {"text": "early"}}))
        .await;
    assert_eq!(peer.next_emitted().await.unwrap().event, "init");
    peer.send_event("initResponse", Value::Null).await;
    connecting.await.unwrap().unwrap();

    peer.send_event("output", json!({"type": "output", "data": {"text": "late"}}))
        .await;
    assert_eq!(recv(&mut outputs).await.text.as_deref(), Some("late"));
}

#[tokio::test]
async fn connect_while_ready_is_rejected() {
    let (session, _peer) = ready(config()).await;
    assert!(matches!(
        session.connect().await,
        Err(Error::InvalidState(ConnectionState::Ready))
    ));
    assert!(session.is_connected());
}
