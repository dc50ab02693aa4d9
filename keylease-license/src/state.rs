//! The license session state machine.
//!
//! ```text
//!   Inactive ──► Activating ──► Active ──► Deactivating ──► Inactive
//!      ▲             │            │              │
//!      └─────────────┘            ▼              ▼
//!                               Locked ◄─────────┘
//!                                 │
//!                                 ▼
//!                            Terminated
//! ```
//!
//! `Inactive`, `Activating` and `Deactivating` may also move straight to
//! `Terminated` when the owning process shuts down.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a license session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No license is bound on this device.
    #[default]
    Inactive,
    /// An activation request is in flight.
    Activating,
    /// The license is bound; heartbeats and revocation listening are running.
    Active,
    /// The server revoked the license. Terminal for the session object.
    Locked,
    /// A deactivation is in progress.
    Deactivating,
    /// The session is over; the process is exiting.
    Terminated,
}

impl SessionState {
    /// All states, in declaration order.
    pub const ALL: [SessionState; 6] = [
        Self::Inactive,
        Self::Activating,
        Self::Active,
        Self::Locked,
        Self::Deactivating,
        Self::Terminated,
    ];

    /// Returns true if `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Inactive, Activating)
                | (Activating, Active)
                | (Activating, Inactive)
                | (Active, Deactivating)
                | (Active, Locked)
                | (Deactivating, Inactive)
                | (Deactivating, Locked)
                | (Locked, Terminated)
                | (Inactive, Terminated)
                | (Activating, Terminated)
                | (Deactivating, Terminated)
        )
    }

    /// Returns true once the session can no longer be activated or deactivated.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Locked | Self::Terminated)
    }

    /// Returns true if the heartbeat loop must be running in this state.
    #[must_use]
    pub fn runs_heartbeat(self) -> bool {
        self == Self::Active
    }

    /// Lower-case name, as used in logs and serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Deactivating => "deactivating",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
