//! Periodic heartbeat loop.
//!
//! The first beat fires one interval after [`HeartbeatScheduler::start`], then
//! every interval until the scheduler is stopped. A failed beat is logged and
//! counted but never ends the loop: revocation arrives on the push channel,
//! so a missed heartbeat is treated as transient.

use chrono::{DateTime, Utc};
use keylease_license::HeartbeatOutcome;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Counters kept by a running scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    /// Beats attempted.
    pub ticks: u64,
    /// Beats that failed.
    pub failures: u64,
    /// Failures since the last acknowledged beat.
    pub consecutive_failures: u64,
    /// When the server last acknowledged a beat.
    pub last_success_at: Option<DateTime<Utc>>,
    /// The most recent server or transport message.
    pub last_message: Option<String>,
}

impl HeartbeatStats {
    fn record(&mut self, outcome: &HeartbeatOutcome) {
        self.ticks += 1;
        if outcome.success {
            self.consecutive_failures = 0;
            self.last_success_at = Some(Utc::now());
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
        }
        if outcome.server_message.is_some() {
            self.last_message.clone_from(&outcome.server_message);
        }
    }
}

/// A cancellable periodic heartbeat task.
///
/// `stop` only signals and never waits for the loop, so it is safe to call
/// from any thread or task. It must not be called from inside the beat
/// action itself.
pub struct HeartbeatScheduler {
    cancel: CancellationToken,
    /// Held while a beat starts and while `stop` cancels.
    gate: Arc<Mutex<()>>,
    task: Option<JoinHandle<()>>,
    stats: Arc<Mutex<HeartbeatStats>>,
}

impl HeartbeatScheduler {
    /// Spawns the loop on the current Tokio runtime.
    pub fn start<F, Fut>(interval: Duration, action: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = HeartbeatOutcome> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let stats = Arc::new(Mutex::new(HeartbeatStats::default()));
        let task = tokio::spawn(run_loop(
            interval.max(Duration::from_millis(1)),
            action,
            cancel.clone(),
            Arc::clone(&gate),
            Arc::clone(&stats),
        ));
        debug!("Heartbeat scheduler started (interval={interval:?})");

        Self {
            cancel,
            gate,
            task: Some(task),
            stats,
        }
    }

    /// Signals the loop to stop. Idempotent.
    ///
    /// Once this returns no new beat begins; a beat already in flight may
    /// complete but is not followed by another.
    pub fn stop(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.cancel.is_cancelled() {
            debug!("Stopping heartbeat scheduler");
            self.cancel.cancel();
        }
    }

    /// Returns true until the loop has been stopped or has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> HeartbeatStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the loop and waits up to `grace` for it to exit, aborting any
    /// beat still in flight after that.
    pub async fn shutdown(mut self, grace: Duration) {
        self.stop();
        let Some(task) = self.task.take() else {
            return;
        };
        let abort = task.abort_handle();
        if tokio::time::timeout(grace, task).await.is_err() {
            warn!("Heartbeat still in flight after {grace:?}, aborting");
            abort.abort();
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<F, Fut>(
    interval: Duration,
    mut action: F,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
    stats: Arc<Mutex<HeartbeatStats>>,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = HeartbeatOutcome> + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(outcome) = beat(&mut action, &cancel, &gate).await else {
            break;
        };
        match &outcome {
            HeartbeatOutcome { success: true, .. } => debug!("Heartbeat acknowledged"),
            HeartbeatOutcome {
                success: false,
                server_message,
            } => warn!(
                "Heartbeat failed: {}",
                server_message.as_deref().unwrap_or("no reason given")
            ),
        }
        stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&outcome);
    }

    debug!("Heartbeat loop stopped");
}

/// Runs one beat unless the scheduler has been stopped.
///
/// The action is invoked and first polled while `gate` is held, the same
/// lock `stop` takes to cancel. A beat therefore either starts before
/// `stop` returns or not at all.
async fn beat<F, Fut>(
    action: &mut F,
    cancel: &CancellationToken,
    gate: &Mutex<()>,
) -> Option<HeartbeatOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HeartbeatOutcome>,
{
    let mut in_flight: Option<Pin<Box<Fut>>> = None;
    poll_fn(|cx| {
        if let Some(fut) = in_flight.as_mut() {
            return fut.as_mut().poll(cx).map(Some);
        }
        let _gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        in_flight.insert(Box::pin(action())).as_mut().poll(cx).map(Some)
    })
    .await
}
