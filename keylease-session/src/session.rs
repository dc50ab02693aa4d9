//! The license session: one per process.
//!
//! All state transitions happen under a single mutex together with starting
//! and stopping the background tasks, so the heartbeat runs exactly while
//! the session is `Active`. Network calls and waiting for tasks to wind down
//! always happen outside that lock.
//!
//! A lock notification arrives on the revocation channel's own task. The
//! lock path therefore only *signals* the channel to close and never waits
//! for it.

use crate::config::SessionConfig;
use crate::heartbeat::{HeartbeatScheduler, HeartbeatStats};
use crate::observer::{SessionObserver, Terminator};
use crate::revocation::{ChannelConfig, ChannelState, LockHandler, RevocationChannel};
use chrono::{DateTime, Utc};
use keylease_license::{
    DeviceIdProvider, HeartbeatOutcome, LicenseError, LicenseIdentity, LicenseResult,
    LockNotification, SessionState, TransportClient,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Mutable session data, guarded by [`SessionInner::core`].
#[derive(Default)]
struct SessionCore {
    state: SessionState,
    identity: Option<LicenseIdentity>,
    activation_id: Option<Uuid>,
    activated_at: Option<DateTime<Utc>>,
    heartbeat: Option<HeartbeatScheduler>,
    channel: Option<RevocationChannel>,
}

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn TransportClient>,
    device: Arc<dyn DeviceIdProvider>,
    observer: Arc<dyn SessionObserver>,
    terminator: Arc<dyn Terminator>,
    core: Mutex<SessionCore>,
}

/// Client-side license session.
///
/// Create one at startup and call [`shutdown`](Self::shutdown) before exit.
pub struct LicenseSession {
    inner: Arc<SessionInner>,
}

impl LicenseSession {
    /// Creates an inactive session.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn TransportClient>,
        device: Arc<dyn DeviceIdProvider>,
        observer: Arc<dyn SessionObserver>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                device,
                observer,
                terminator,
                core: Mutex::new(SessionCore::default()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock_core().state
    }

    /// Returns the bound identity while a license is active.
    pub fn identity(&self) -> Option<LicenseIdentity> {
        self.inner.lock_core().identity.clone()
    }

    /// Returns the id of the current activation.
    pub fn activation_id(&self) -> Option<Uuid> {
        self.inner.lock_core().activation_id
    }

    /// Returns when the current activation succeeded.
    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock_core().activated_at
    }

    /// Returns true while the heartbeat loop is running.
    pub fn is_heartbeat_running(&self) -> bool {
        self.inner
            .lock_core()
            .heartbeat
            .as_ref()
            .is_some_and(HeartbeatScheduler::is_running)
    }

    /// Returns heartbeat counters for the current activation.
    pub fn heartbeat_stats(&self) -> Option<HeartbeatStats> {
        self.inner.lock_core().heartbeat.as_ref().map(HeartbeatScheduler::stats)
    }

    /// Returns the revocation channel state, if one is open.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.inner.lock_core().channel.as_ref().map(RevocationChannel::state)
    }

    /// Activates `license_key` on this device.
    ///
    /// On success the session is `Active`, heartbeats are scheduled and the
    /// revocation channel starts connecting in the background. On failure
    /// the session is back to `Inactive`.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidTransition`] unless the session is `Inactive`
    /// - [`LicenseError::IdentityUnavailable`] if the device id cannot be derived
    /// - [`LicenseError::EmptyLicenseKey`] for a blank key
    /// - [`LicenseError::ServerRejected`] with the server's message on a non-200 answer
    /// - [`LicenseError::Connectivity`] if the server cannot be reached
    pub async fn activate(&self, license_key: &str) -> LicenseResult<()> {
        let inner = &self.inner;
        {
            let core = inner.lock_core();
            if core.state != SessionState::Inactive {
                return Err(LicenseError::InvalidTransition {
                    operation: "activate",
                    state: core.state,
                });
            }
        }

        let device_id = inner.device.device_id()?;
        let identity = LicenseIdentity::new(license_key, device_id, &inner.config.product_name)?;

        {
            let mut core = inner.lock_core();
            inner.transition(&mut core, SessionState::Activating, "activate")?;
        }

        info!(
            "Activating {} on device {} for {}",
            identity.masked_key(),
            identity.device_id(),
            identity.product_name()
        );
        let result = inner
            .transport
            .activate(&identity)
            .await
            .and_then(|response| response.into_result());

        let mut core = inner.lock_core();
        if core.state != SessionState::Activating {
            // Shut down while the request was in flight.
            let state = core.state;
            drop(core);
            if result.is_ok() {
                inner.release_remote(identity);
            }
            return Err(LicenseError::InvalidTransition {
                operation: "activate",
                state,
            });
        }

        match result {
            Ok(_) => {
                let activation_id = Uuid::new_v4();
                inner.transition(&mut core, SessionState::Active, "activate")?;
                core.heartbeat = Some(inner.start_heartbeat(&identity));
                core.channel = Some(RevocationChannel::open(
                    ChannelConfig::from(&inner.config),
                    &identity,
                    Arc::new(SessionLockHandler {
                        session: Arc::downgrade(inner),
                    }),
                ));
                core.activation_id = Some(activation_id);
                core.activated_at = Some(Utc::now());
                core.identity = Some(identity);
                info!("License activated (activation {})", activation_id);
                Ok(())
            }
            Err(e) => {
                inner.transition(&mut core, SessionState::Inactive, "activate")?;
                warn!("Activation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Releases the license.
    ///
    /// Local teardown always completes: the heartbeat stops, the revocation
    /// channel closes and the session returns to `Inactive`, even when the
    /// server call fails.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::InvalidTransition`] unless the session is `Active`
    /// - [`LicenseError::ServerRejected`] / [`LicenseError::Connectivity`] from the server call
    pub async fn deactivate(&self) -> LicenseResult<()> {
        let inner = &self.inner;
        let (identity, heartbeat, channel) = {
            let mut core = inner.lock_core();
            if core.state != SessionState::Active {
                return Err(LicenseError::InvalidTransition {
                    operation: "deactivate",
                    state: core.state,
                });
            }
            inner.transition(&mut core, SessionState::Deactivating, "deactivate")?;
            let heartbeat = core.heartbeat.take();
            if let Some(hb) = &heartbeat {
                hb.stop();
            }
            let channel = core.channel.take();
            if let Some(channel) = &channel {
                channel.cancel();
            }
            (core.identity.clone(), heartbeat, channel)
        };

        let grace = inner.config.stop_grace();
        tokio::join!(
            async {
                if let Some(heartbeat) = heartbeat {
                    heartbeat.shutdown(grace).await;
                }
            },
            async {
                if let Some(channel) = channel {
                    channel.close(grace).await;
                }
            },
        );

        let result = match &identity {
            Some(identity) => {
                info!("Deactivating {}", identity.masked_key());
                inner
                    .transport
                    .deactivate(identity)
                    .await
                    .and_then(|response| response.into_result())
                    .map(|_| ())
            }
            None => Ok(()),
        };

        let mut core = inner.lock_core();
        if core.state == SessionState::Deactivating {
            inner.transition(&mut core, SessionState::Inactive, "deactivate")?;
            core.identity = None;
            core.activation_id = None;
            core.activated_at = None;
        } else {
            debug!("Session moved to {} during deactivation", core.state);
        }
        drop(core);

        match &result {
            Ok(()) => info!("License deactivated"),
            Err(e) => warn!("Deactivation failed on server, local state cleared: {}", e),
        }
        result
    }

    /// Applies a server revocation.
    ///
    /// Idempotent: a repeated lock is ignored. Otherwise the heartbeat stops,
    /// the session enters `Locked`, the observer is told why, the session
    /// enters `Terminated` and the terminator ends the process.
    pub fn apply_lock(&self, reason: &str) {
        self.inner.apply_lock(reason);
    }

    /// Handler that routes channel notifications into this session.
    pub fn lock_handler(&self) -> Arc<dyn LockHandler> {
        Arc::new(SessionLockHandler {
            session: Arc::downgrade(&self.inner),
        })
    }

    /// Ends the session before process exit.
    ///
    /// An active license is deactivated first (best effort). Locked or
    /// terminated sessions are left as they are.
    pub async fn shutdown(&self) {
        let state = self.state();
        if state == SessionState::Active {
            if let Err(e) = self.deactivate().await {
                warn!("Deactivation during shutdown failed: {}", e);
            }
        }

        let inner = &self.inner;
        let mut core = inner.lock_core();
        if core.state.can_transition_to(SessionState::Terminated) && core.state != SessionState::Locked {
            match inner.transition(&mut core, SessionState::Terminated, "shut down") {
                Ok(()) => info!("License session shut down"),
                Err(e) => debug!("Shutdown left session as is: {}", e),
            }
        }
    }
}

impl SessionInner {
    fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` and notifies the observer. Caller holds the lock.
    fn transition(
        &self,
        core: &mut SessionCore,
        next: SessionState,
        operation: &'static str,
    ) -> LicenseResult<()> {
        if !core.state.can_transition_to(next) {
            return Err(LicenseError::InvalidTransition {
                operation,
                state: core.state,
            });
        }
        debug!("Session {} -> {}", core.state, next);
        core.state = next;
        self.observer.on_state_changed(next);
        Ok(())
    }

    fn start_heartbeat(&self, identity: &LicenseIdentity) -> HeartbeatScheduler {
        let transport = Arc::clone(&self.transport);
        let identity = identity.clone();
        HeartbeatScheduler::start(self.config.heartbeat_interval(), move || {
            let transport = Arc::clone(&transport);
            let identity = identity.clone();
            async move { HeartbeatOutcome::from_result(transport.heartbeat(&identity).await) }
        })
    }

    fn apply_lock(&self, reason: &str) {
        {
            let mut core = self.lock_core();
            match core.state {
                SessionState::Locked | SessionState::Terminated => {
                    debug!("Ignoring lock while {}: {}", core.state, reason);
                    return;
                }
                SessionState::Active | SessionState::Deactivating => {}
                SessionState::Inactive | SessionState::Activating => {
                    warn!("Ignoring lock while {}: {}", core.state, reason);
                    return;
                }
            }

            if let Some(heartbeat) = core.heartbeat.take() {
                heartbeat.stop();
            }
            if let Some(channel) = core.channel.take() {
                channel.detach();
            }
            if self.transition(&mut core, SessionState::Locked, "lock").is_err() {
                return;
            }
            error!("License revoked: {}", reason);
            self.observer.on_locked(reason);
            if self.transition(&mut core, SessionState::Terminated, "lock").is_err() {
                return;
            }
        }
        self.terminator.terminate(reason);
    }

    /// Releases a binding the server granted after we stopped wanting it.
    fn release_remote(&self, identity: LicenseIdentity) {
        let transport = Arc::clone(&self.transport);
        info!("Releasing late activation of {}", identity.masked_key());
        tokio::spawn(async move {
            match transport.deactivate(&identity).await.and_then(|r| r.into_result()) {
                Ok(_) => debug!("Late activation released"),
                Err(e) => warn!("Failed to release late activation: {}", e),
            }
        });
    }
}

/// Routes revocation notifications into a session without keeping it alive.
struct SessionLockHandler {
    session: Weak<SessionInner>,
}

impl LockHandler for SessionLockHandler {
    fn on_lock(&self, notification: LockNotification) {
        match self.session.upgrade() {
            Some(session) => session.apply_lock(&notification.reason),
            None => debug!("Lock received after session was dropped"),
        }
    }
}
