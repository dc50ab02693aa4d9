//! Server-pushed control messages.
//!
//! The revocation channel carries one JSON object per message. Only
//! `{"type": "LOCK", "reason": "..."}` means anything to the client; every
//! other type is surfaced as [`ControlMessage::Unknown`] so newer servers can
//! add message kinds without breaking older clients.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type tag for a revocation.
pub const LOCK_TYPE: &str = "LOCK";

/// Reason used when a LOCK message carries none.
pub const DEFAULT_LOCK_REASON: &str = "License has been revoked";

/// A server-initiated revocation of the active license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockNotification {
    /// Human-readable reason supplied by the server.
    pub reason: String,
}

impl LockNotification {
    /// Creates a notification.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The license was revoked.
    Lock(LockNotification),
    /// A message type this client does not understand.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl Envelope {
    fn reason(&self) -> Option<String> {
        self.reason.clone().or_else(|| {
            self.payload
                .as_ref()
                .and_then(|p| p.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// Returns [`LicenseError::Protocol`] if the text is not a JSON object with a
/// string `type` field.
pub fn decode_control(text: &str) -> LicenseResult<ControlMessage> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| LicenseError::Protocol(format!("malformed control message: {e}")))?;

    if envelope.kind == LOCK_TYPE {
        let reason = envelope
            .reason()
            .unwrap_or_else(|| DEFAULT_LOCK_REASON.to_string());
        Ok(ControlMessage::Lock(LockNotification { reason }))
    } else {
        Ok(ControlMessage::Unknown(envelope.kind))
    }
}
