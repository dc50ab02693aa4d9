//! Request/response transport to the license server.
//!
//! The session layer talks to the server only through [`TransportClient`],
//! so tests can swap in a scripted implementation. [`HttpTransport`] is the
//! production client: three JSON `POST` endpoints under a common base URL.

use crate::error::{LicenseError, LicenseResult};
use crate::identity::LicenseIdentity;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A raw server answer: status code and body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A `200` response with an empty body.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(200, "")
    }

    /// Only `200` counts as success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// The server's explanation: the `message` field of a JSON body, else
    /// the raw body.
    #[must_use]
    pub fn message(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
        }

        serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| self.body.clone())
    }

    /// Converts a non-success response into [`LicenseError::ServerRejected`].
    ///
    /// # Errors
    ///
    /// Returns `ServerRejected` carrying [`Self::message`] for any status other than `200`.
    pub fn into_result(self) -> LicenseResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LicenseError::ServerRejected {
                status: self.status,
                message: self.message(),
            })
        }
    }
}

/// Result of one heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Whether the server acknowledged the heartbeat.
    pub success: bool,
    /// Server or transport explanation, if any.
    pub server_message: Option<String>,
}

impl HeartbeatOutcome {
    /// An acknowledged heartbeat.
    #[must_use]
    pub fn acknowledged() -> Self {
        Self {
            success: true,
            server_message: None,
        }
    }

    /// A failed heartbeat with an explanation.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            server_message: Some(message.into()),
        }
    }

    /// Interprets the result of a heartbeat request.
    #[must_use]
    pub fn from_result(result: LicenseResult<TransportResponse>) -> Self {
        match result {
            Ok(response) if response.is_success() => {
                let message = response.message();
                Self {
                    success: true,
                    server_message: (!message.trim().is_empty()).then_some(message),
                }
            }
            Ok(response) => Self::failed(response.message()),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Issues license requests to the server.
///
/// Implementations return `Ok` for any HTTP answer, including non-200 ones;
/// `Err` is reserved for failing to reach the server at all.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Binds the license to the device.
    async fn activate(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse>;

    /// Releases the binding.
    async fn deactivate(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse>;

    /// Proves the device still holds the license.
    async fn heartbeat(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Base URL of the license API (e.g. `http://localhost:8080/api/license`).
    pub api_base_url: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/license".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// JSON-over-HTTP transport.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Connectivity`] if the HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> LicenseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LicenseError::Connectivity(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/{operation}",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        body: &B,
    ) -> LicenseResult<TransportResponse> {
        let url = self.endpoint(operation);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LicenseError::Connectivity(format!("{operation} request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LicenseError::Connectivity(format!("{operation} response unreadable: {e}")))?;

        debug!("{} answered {}", url, status);
        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn activate(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.post("activate", &identity.activation_request()).await
    }

    async fn deactivate(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.post("deactivate", &identity.device_request()).await
    }

    async fn heartbeat(&self, identity: &LicenseIdentity) -> LicenseResult<TransportResponse> {
        self.post("heartbeat", &identity.device_request()).await
    }
}
