//! Seams through which the session reaches the presentation layer and the
//! process.

use keylease_license::SessionState;
use tracing::info;

/// Receives session events for presentation.
///
/// Callbacks run inside the session's transition critical section, so the
/// order they are observed in is the order transitions took effect.
/// Implementations must hand work off (to a UI thread, a channel, ...) and
/// must not call back into the session.
pub trait SessionObserver: Send + Sync {
    /// The session entered `state`.
    fn on_state_changed(&self, state: SessionState) {
        let _ = state;
    }

    /// The server revoked the license.
    fn on_locked(&self, reason: &str) {
        let _ = reason;
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Ends the process after a revocation.
///
/// Called exactly once, after the session has entered `Terminated`, from the
/// task that delivered the lock. Must not block.
pub trait Terminator: Send + Sync {
    /// Terminates the process.
    fn terminate(&self, reason: &str);
}

/// Terminator that only logs; for embedders that manage exit themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTerminator;

impl Terminator for LogTerminator {
    fn terminate(&self, reason: &str) {
        info!("License session terminated: {}", reason);
    }
}
