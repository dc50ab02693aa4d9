//! Error types for the licensing module.

use crate::state::SessionState;
use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The license server could not be reached.
    #[error("cannot reach license server: {0}")]
    Connectivity(String),

    /// The server answered with a non-success status.
    ///
    /// Displays as the server-supplied message alone so it can be shown to
    /// the user verbatim.
    #[error("{message}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Message decoded from the response body.
        message: String,
    },

    /// No stable device identifier could be derived on this machine.
    #[error("device identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// A control message from the server could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation is not legal in the current session state.
    #[error("cannot {operation} while session is {state}")]
    InvalidTransition {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// An empty license key was supplied.
    #[error("license key must not be empty")]
    EmptyLicenseKey,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true if the server was unreachable (as opposed to rejecting the request).
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Returns the HTTP status of a server rejection.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
