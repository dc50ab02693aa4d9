//! Server-pushed revocation channel.
//!
//! One WebSocket per `(licenseKey, deviceId)` pair, opened at
//! `{ws_base_url}/ws/license?licenseKey=..&deviceId=..`. A supervising task
//! owns the connection and the retry policy:
//!
//! ```text
//!   Connecting ──► Open ──► Closed
//!        └────────────────────▲
//! ```
//!
//! A close that is neither locally requested nor initiated by the server
//! (dropped TCP connection, failed handshake, transport error) is retried
//! after a fixed backoff, at most `max_reconnects` times over the lifetime of
//! the channel. A close frame from the server or a local close ends the
//! channel for good.

use crate::config::SessionConfig;
use futures::{SinkExt, StreamExt};
use keylease_license::{decode_control, ControlMessage, LicenseIdentity, LockNotification};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of a revocation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress.
    Connecting,
    /// Connected; notifications can arrive.
    Open,
    /// Disconnected. May move back to `Connecting` for a reconnect.
    Closed,
}

/// Receives the revocation delivered by the channel.
pub trait LockHandler: Send + Sync {
    /// Called at most once per channel, from the channel's receive task.
    fn on_lock(&self, notification: LockNotification);
}

/// Connection settings for a revocation channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base WebSocket URL.
    pub ws_base_url: String,
    /// `Origin` header for the handshake.
    pub origin: Option<String>,
    /// Delay before a reconnect attempt.
    pub reconnect_backoff: Duration,
    /// Reconnect attempts allowed over the channel's lifetime.
    pub max_reconnects: u32,
}

impl From<&SessionConfig> for ChannelConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ws_base_url: config.ws_base_url.clone(),
            origin: config.origin.clone(),
            reconnect_backoff: config.reconnect_backoff(),
            max_reconnects: config.max_reconnects,
        }
    }
}

/// Builds the channel endpoint for an identity.
#[must_use]
pub fn revocation_endpoint(ws_base_url: &str, identity: &LicenseIdentity) -> String {
    format!(
        "{}/ws/license?licenseKey={}&deviceId={}",
        ws_base_url.trim_end_matches('/'),
        urlencoding::encode(identity.license_key()),
        urlencoding::encode(identity.device_id()),
    )
}

/// How a connection ended.
#[derive(Debug)]
enum Disconnect {
    /// We asked for it.
    Local,
    /// The server sent a close frame.
    Remote(Option<u16>),
    /// Anything else.
    Abnormal(String),
}

/// Handle to a running revocation channel.
pub struct RevocationChannel {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ChannelState>,
    reconnects: Arc<AtomicU32>,
}

impl RevocationChannel {
    /// Starts connecting in the background and returns immediately.
    pub fn open(
        config: ChannelConfig,
        identity: &LicenseIdentity,
        handler: Arc<dyn LockHandler>,
    ) -> Self {
        let endpoint = revocation_endpoint(&config.ws_base_url, identity);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let reconnects = Arc::new(AtomicU32::new(0));

        info!(
            "Opening revocation channel to {} for {}",
            config.ws_base_url,
            identity.masked_key()
        );
        let task = tokio::spawn(supervise(
            endpoint,
            config,
            handler,
            cancel.clone(),
            state_tx,
            Arc::clone(&reconnects),
        ));

        Self {
            cancel,
            task: Some(task),
            state: state_rx,
            reconnects,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Number of reconnect attempts made so far.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Requests a graceful close without waiting for it. Idempotent.
    ///
    /// The receive loop stops reading frames and no reconnect follows. Safe
    /// to call from inside the channel's own receive task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Like [`cancel`](Self::cancel), releasing the handle.
    pub fn detach(self) {
        self.cancel();
    }

    /// Closes the channel and waits up to `grace` for the closing handshake.
    /// No reconnect follows.
    pub async fn close(mut self, grace: Duration) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        let abort = task.abort_handle();
        if tokio::time::timeout(grace, task).await.is_err() {
            warn!("Revocation channel did not close within {grace:?}, aborting");
            abort.abort();
        }
    }
}

impl Drop for RevocationChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    endpoint: String,
    config: ChannelConfig,
    handler: Arc<dyn LockHandler>,
    cancel: CancellationToken,
    state: watch::Sender<ChannelState>,
    reconnects: Arc<AtomicU32>,
) {
    let mut attempts_left = config.max_reconnects;
    let mut lock_delivered = false;

    loop {
        state.send_replace(ChannelState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            connected = connect(&endpoint, config.origin.as_deref()) => Some(connected),
        };

        let disconnect = match connected {
            None => Disconnect::Local,
            Some(Ok(ws)) => {
                info!("Revocation channel open");
                state.send_replace(ChannelState::Open);
                receive(ws, handler.as_ref(), &cancel, &mut lock_delivered).await
            }
            Some(Err(reason)) => Disconnect::Abnormal(reason),
        };
        state.send_replace(ChannelState::Closed);

        match disconnect {
            Disconnect::Local => {
                debug!("Revocation channel closed locally");
                return;
            }
            Disconnect::Remote(code) => {
                info!("Revocation channel closed by server (code {:?})", code);
                return;
            }
            Disconnect::Abnormal(reason) => {
                if cancel.is_cancelled() {
                    return;
                }
                if attempts_left == 0 {
                    warn!("Revocation channel lost ({}), not reconnecting", reason);
                    return;
                }
                attempts_left -= 1;
                warn!(
                    "Revocation channel closed abnormally ({}), reconnecting in {:?}",
                    reason, config.reconnect_backoff
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.reconnect_backoff) => {}
                }
                reconnects.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

async fn connect(endpoint: &str, origin: Option<&str>) -> Result<WsStream, String> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| format!("invalid endpoint: {e}"))?;
    if let Some(origin) = origin {
        match HeaderValue::from_str(origin) {
            Ok(value) => {
                request.headers_mut().insert(ORIGIN, value);
            }
            Err(e) => warn!("Ignoring invalid origin {:?}: {}", origin, e),
        }
    }

    match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await {
        Ok(Ok((ws, response))) => {
            debug!("Revocation handshake answered {}", response.status());
            Ok(ws)
        }
        Ok(Err(e)) => Err(format!("handshake failed: {e}")),
        Err(_) => Err(format!("handshake timed out after {CONNECT_TIMEOUT:?}")),
    }
}

async fn receive(
    mut ws: WsStream,
    handler: &dyn LockHandler,
    cancel: &CancellationToken,
    lock_delivered: &mut bool,
) -> Disconnect {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                close_gracefully(&mut ws).await;
                return Disconnect::Local;
            }
            frame = ws.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(_))) if cancel.is_cancelled() => {
                close_gracefully(&mut ws).await;
                return Disconnect::Local;
            }
            Some(Ok(Message::Text(text))) => dispatch(&text, handler, lock_delivered),
            Some(Ok(Message::Close(frame))) => {
                // Flush the echoed close frame.
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.flush()).await;
                return Disconnect::Remote(frame.map(|f| u16::from(f.code)));
            }
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed)) | None => {
                return Disconnect::Abnormal("connection ended without close frame".to_string());
            }
            Some(Err(e)) => {
                warn!("Revocation channel error: {}", e);
                return Disconnect::Abnormal(e.to_string());
            }
        }
    }
}

fn dispatch(text: &str, handler: &dyn LockHandler, lock_delivered: &mut bool) {
    match decode_control(text) {
        Ok(ControlMessage::Lock(notification)) => {
            if *lock_delivered {
                debug!("Ignoring repeated LOCK: {}", notification.reason);
                return;
            }
            *lock_delivered = true;
            warn!("License locked by server: {}", notification.reason);
            handler.on_lock(notification);
        }
        Ok(ControlMessage::Unknown(kind)) => {
            debug!("Ignoring control message of type {:?}", kind);
        }
        Err(e) => warn!("Dropping control message: {}", e),
    }
}

async fn close_gracefully(ws: &mut WsStream) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        if ws.close(Some(frame)).await.is_ok() {
            while let Some(Ok(_)) = ws.next().await {}
        }
    })
    .await;
}
