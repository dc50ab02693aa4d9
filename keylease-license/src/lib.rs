//! Licensing primitives for Keylease.
//!
//! This crate holds the leaf pieces of the client:
//! - The license identity (key + device + product) sent with every request
//! - The session state machine and its legal transitions
//! - Device identity derived from the local hardware address
//! - The request/response transport to the license server
//! - Decoding of server-pushed control messages
//!
//! The concurrent session lifecycle built on top of these lives in
//! `keylease-session`.

mod control;
mod device;
mod error;
mod identity;
mod state;
mod transport;

pub use control::{
    decode_control, ControlMessage, LockNotification, DEFAULT_LOCK_REASON, LOCK_TYPE,
};
pub use device::{
    normalize_mac, select_hardware_address, DeviceIdProvider, DeviceInfo, FixedDeviceId,
    HardwareDeviceId,
};
pub use error::{LicenseError, LicenseResult};
pub use identity::{ActivationRequest, DeviceRequest, LicenseIdentity};
pub use state::SessionState;
pub use transport::{
    HeartbeatOutcome, HttpTransport, HttpTransportConfig, TransportClient, TransportResponse,
};

/// Error returned by a failed activation.
pub type ActivationError = LicenseError;

/// Error returned by a failed deactivation.
pub type DeactivationError = LicenseError;
