//! Tests for the heartbeat scheduler, on a paused clock.

use keylease_license::HeartbeatOutcome;
use keylease_session::HeartbeatScheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn counting(
    count: Arc<AtomicUsize>,
) -> impl FnMut() -> std::future::Ready<HeartbeatOutcome> + Send + 'static {
    move || {
        count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(HeartbeatOutcome::acknowledged())
    }
}

#[tokio::test(start_paused = true)]
async fn first_beat_fires_after_one_interval() {
    let count = Arc::new(AtomicUsize::new(0));
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), counting(Arc::clone(&count)));

    sleep(Duration::from_secs(9)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(hb.is_running());
}

#[tokio::test(start_paused = true)]
async fn no_beat_after_stop() {
    let count = Arc::new(AtomicUsize::new(0));
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), counting(Arc::clone(&count)));

    sleep(Duration::from_secs(15)).await;
    hb.stop();
    assert!(!hb.is_running());

    sleep(Duration::from_secs(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let count = Arc::new(AtomicUsize::new(0));
    let hb = HeartbeatScheduler::start(Duration::from_secs(1), counting(Arc::clone(&count)));

    hb.stop();
    hb.stop();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_from_another_thread() {
    let count = Arc::new(AtomicUsize::new(0));
    let hb = Arc::new(HeartbeatScheduler::start(
        Duration::from_secs(10),
        counting(Arc::clone(&count)),
    ));

    sleep(Duration::from_secs(11)).await;
    let remote = Arc::clone(&hb);
    std::thread::spawn(move || remote.stop()).join().unwrap();

    sleep(Duration::from_secs(60)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!hb.is_running());
}

#[tokio::test(start_paused = true)]
async fn failures_do_not_end_the_loop() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), move || {
        c.fetch_add(1, Ordering::SeqCst);
        std::future::ready(HeartbeatOutcome::failed("server unavailable"))
    });

    sleep(Duration::from_secs(35)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(hb.is_running());

    let stats = hb.stats();
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.consecutive_failures, 3);
    assert!(stats.last_success_at.is_none());
    assert_eq!(stats.last_message.as_deref(), Some("server unavailable"));
}

#[tokio::test(start_paused = true)]
async fn success_resets_consecutive_failures() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        std::future::ready(if n < 2 {
            HeartbeatOutcome::failed("timeout")
        } else {
            HeartbeatOutcome::acknowledged()
        })
    });

    sleep(Duration::from_secs(35)).await;
    let stats = hb.stats();
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.consecutive_failures, 0);
    assert!(stats.last_success_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_beat_in_flight_after_grace() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), move || {
        let (s, f) = (Arc::clone(&s), Arc::clone(&f));
        async move {
            s.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(60)).await;
            f.fetch_add(1, Ordering::SeqCst);
            HeartbeatOutcome::acknowledged()
        }
    });

    sleep(Duration::from_secs(11)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    hb.shutdown(Duration::from_secs(1)).await;
    sleep(Duration::from_secs(120)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_short_beat_finish() {
    let finished = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&finished);
    let hb = HeartbeatScheduler::start(Duration::from_secs(10), move || {
        let f = Arc::clone(&f);
        async move {
            sleep(Duration::from_millis(500)).await;
            f.fetch_add(1, Ordering::SeqCst);
            HeartbeatOutcome::acknowledged()
        }
    });

    sleep(Duration::from_millis(10_100)).await;
    hb.shutdown(Duration::from_secs(2)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_scheduler_stops_the_loop() {
    let count = Arc::new(AtomicUsize::new(0));
    let hb = HeartbeatScheduler::start(Duration::from_secs(1), counting(Arc::clone(&count)));
    drop(hb);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_beat_begins_after_stop_returns_on_another_thread() {
    for _ in 0..50 {
        let count = Arc::new(AtomicUsize::new(0));
        let hb = Arc::new(HeartbeatScheduler::start(
            Duration::from_millis(1),
            counting(Arc::clone(&count)),
        ));
        sleep(Duration::from_millis(3)).await;

        let (remote, c) = (Arc::clone(&hb), Arc::clone(&count));
        let at_stop = std::thread::spawn(move || {
            remote.stop();
            c.load(Ordering::SeqCst)
        })
        .join()
        .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
    }
}
