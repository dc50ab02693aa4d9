//! Shared test helpers for session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use keylease_license::{
    FixedDeviceId, LicenseError, LicenseIdentity, LicenseResult, SessionState, TransportClient,
    TransportResponse,
};
use keylease_session::{LicenseSession, SessionConfig, SessionObserver, Terminator};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

// ── Transport ───────────────────────────────────────────────────

/// A scripted server answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Unreachable,
}

impl Reply {
    pub fn ok() -> Self {
        Self::Status(200, String::new())
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::Status(status, format!(r#"{{"message":"{message}"}}"#))
    }

    fn to_result(&self) -> LicenseResult<TransportResponse> {
        match self {
            Self::Status(status, body) => Ok(TransportResponse::new(*status, body.clone())),
            Self::Unreachable => Err(LicenseError::Connectivity("connection refused".into())),
        }
    }
}

/// Transport with scripted replies and call counters.
pub struct MockTransport {
    activate: Mutex<Reply>,
    deactivate: Mutex<Reply>,
    heartbeat: Mutex<Reply>,
    activate_delay: Duration,
    heartbeat_delay: Duration,
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub identities: Mutex<Vec<LicenseIdentity>>,
}

impl MockTransport {
    pub fn ok() -> Self {
        Self {
            activate: Mutex::new(Reply::ok()),
            deactivate: Mutex::new(Reply::ok()),
            heartbeat: Mutex::new(Reply::ok()),
            activate_delay: Duration::ZERO,
            heartbeat_delay: Duration::ZERO,
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            identities: Mutex::new(Vec::new()),
        }
    }

    pub fn with_activate(self, reply: Reply) -> Self {
        self.set_activate(reply);
        self
    }

    pub fn set_activate(&self, reply: Reply) {
        *self.activate.lock().unwrap() = reply;
    }

    pub fn with_deactivate(self, reply: Reply) -> Self {
        *self.deactivate.lock().unwrap() = reply;
        self
    }

    pub fn with_heartbeat(self, reply: Reply) -> Self {
        *self.heartbeat.lock().unwrap() = reply;
        self
    }

    pub fn with_activate_delay(mut self, delay: Duration) -> Self {
        self.activate_delay = delay;
        self
    }

    pub fn with_heartbeat_delay(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = delay;
        self
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn activate(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.identities.lock().unwrap().push(identity.clone());
        if !self.activate_delay.is_zero() {
            tokio::time::sleep(self.activate_delay).await;
        }
        let reply = self.activate.lock().unwrap().clone();
        reply.to_result()
    }

    async fn deactivate(&self, _identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        let reply = self.deactivate.lock().unwrap().clone();
        reply.to_result()
    }

    async fn heartbeat(&self, _identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if !self.heartbeat_delay.is_zero() {
            tokio::time::sleep(self.heartbeat_delay).await;
        }
        let reply = self.heartbeat.lock().unwrap().clone();
        reply.to_result()
    }
}

// ── Observer / terminator ───────────────────────────────────────

#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<SessionState>>,
    pub locks: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn locks(&self) -> Vec<String> {
        self.locks.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state_changed(&self, state: SessionState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_locked(&self, reason: &str) {
        self.locks.lock().unwrap().push(reason.to_string());
    }
}

#[derive(Default)]
pub struct RecordingTerminator {
    pub reasons: Mutex<Vec<String>>,
    pub notify: Notify,
}

impl RecordingTerminator {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }

    pub async fn wait(&self, timeout: Duration) -> bool {
        if !self.reasons().is_empty() {
            return true;
        }
        tokio::time::timeout(timeout, self.notify.notified()).await.is_ok()
            || !self.reasons().is_empty()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
        self.notify.notify_one();
    }
}

// ── Session fixture ─────────────────────────────────────────────

pub struct Fixture {
    pub session: Arc<LicenseSession>,
    pub transport: Arc<MockTransport>,
    pub observer: Arc<RecordingObserver>,
    pub terminator: Arc<RecordingTerminator>,
}

/// Fast timings for tests.
pub fn test_config(ws_base_url: &str) -> SessionConfig {
    SessionConfig {
        product_name: "Product 1".to_string(),
        ws_base_url: ws_base_url.to_string(),
        origin: Some("http://localhost".to_string()),
        heartbeat_interval_ms: 30,
        reconnect_backoff_ms: 20,
        max_reconnects: 1,
        stop_grace_ms: 500,
    }
}

/// A WebSocket URL nothing listens on.
pub const UNREACHABLE_WS: &str = "ws://127.0.0.1:1";

pub fn fixture(transport: MockTransport, ws_base_url: &str) -> Fixture {
    fixture_with_device(transport, ws_base_url, "AA11")
}

pub fn fixture_with_device(transport: MockTransport, ws_base_url: &str, device_id: &str) -> Fixture {
    let transport = Arc::new(transport);
    let observer = Arc::new(RecordingObserver::default());
    let terminator = Arc::new(RecordingTerminator::default());
    let session = Arc::new(LicenseSession::new(
        test_config(ws_base_url),
        transport.clone(),
        Arc::new(FixedDeviceId::new(device_id)),
        observer.clone(),
        terminator.clone(),
    ));
    Fixture {
        session,
        transport,
        observer,
        terminator,
    }
}

/// Routes session logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keylease_session=debug")
        .with_test_writer()
        .try_init();
}

/// Polls `cond` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── WebSocket server ────────────────────────────────────────────

/// What the test server does with each accepted connection.
#[derive(Debug, Clone)]
pub enum ServerScript {
    /// Send these frames, then read until the client goes away.
    SendThenHold(Vec<String>),
    /// Drop the TCP connection without a close frame.
    Drop,
    /// Send a close frame with the given code.
    Close(u16),
}

pub struct WsServer {
    pub url: String,
    pub connections: Arc<AtomicUsize>,
    pub accepted_at: Arc<Mutex<Vec<Instant>>>,
    pub request_uris: Arc<Mutex<Vec<String>>>,
    pub origins: Arc<Mutex<Vec<String>>>,
    pub client_closed_gracefully: Arc<AtomicBool>,
}

impl WsServer {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Spins up a WebSocket server on an OS-assigned port.
pub async fn spawn_ws_server(script: ServerScript) -> WsServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = WsServer {
        url: format!("ws://127.0.0.1:{port}"),
        connections: Arc::new(AtomicUsize::new(0)),
        accepted_at: Arc::new(Mutex::new(Vec::new())),
        request_uris: Arc::new(Mutex::new(Vec::new())),
        origins: Arc::new(Mutex::new(Vec::new())),
        client_closed_gracefully: Arc::new(AtomicBool::new(false)),
    };

    let connections = server.connections.clone();
    let accepted_at = server.accepted_at.clone();
    let uris = server.request_uris.clone();
    let origins = server.origins.clone();
    let graceful = server.client_closed_gracefully.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let uris = uris.clone();
            let origins = origins.clone();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uris.lock().unwrap().push(req.uri().to_string());
                if let Some(origin) = req.headers().get("origin") {
                    origins
                        .lock()
                        .unwrap()
                        .push(origin.to_str().unwrap_or_default().to_string());
                }
                Ok(resp)
            };
            let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            accepted_at.lock().unwrap().push(Instant::now());
            connections.fetch_add(1, Ordering::SeqCst);

            let script = script.clone();
            let graceful = graceful.clone();
            tokio::spawn(async move {
                match script {
                    ServerScript::SendThenHold(frames) => {
                        for frame in frames {
                            if ws.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        while let Some(Ok(msg)) = ws.next().await {
                            if matches!(msg, Message::Close(Some(ref f)) if f.code == CloseCode::Normal) {
                                graceful.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                    ServerScript::Drop => drop(ws),
                    ServerScript::Close(code) => {
                        let _ = ws
                            .close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: "server closing".into(),
                            }))
                            .await;
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                }
            });
        }
    });

    server
}

pub fn lock_frame(reason: &str) -> String {
    serde_json::json!({ "type": "LOCK", "reason": reason }).to_string()
}
