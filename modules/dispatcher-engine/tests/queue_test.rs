//! TaskQueue behaviour: dedup, ordering, isolation, gating.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatcher_engine::{
    AlwaysReady, JobAction, MemoryAlertSink, QueueConfig, Readiness, TaskQueue,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast() -> QueueConfig {
    QueueConfig {
        idle_interval: Duration::from_millis(10),
        readiness_poll_interval: Duration::from_millis(10),
    }
}

fn ready_queue(alerts: &Arc<MemoryAlertSink>) -> TaskQueue {
    TaskQueue::new("test", Arc::new(AlwaysReady), alerts.clone(), fast())
}

fn record(log: &Arc<Mutex<Vec<String>>>, label: &str) -> JobAction {
    let log = Arc::clone(log);
    let label = label.to_string();
    Box::new(move || {
        async move {
            log.lock().unwrap().push(label);
            Ok(())
        }
        .boxed()
    })
}

fn failing(message: &'static str) -> JobAction {
    Box::new(move || async move { Err(anyhow::anyhow!(message)) }.boxed())
}

async fn settle(queue: &TaskQueue) {
    timeout(Duration::from_secs(5), queue.wait_until_idle())
        .await
        .expect("queue did not go idle");
}

/// Readiness flipped by the test.
#[derive(Default)]
struct Switch(AtomicBool);

#[async_trait]
impl Readiness for Switch {
    async fn ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_key_is_discarded_while_pending() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let log = Arc::new(Mutex::new(Vec::new()));

    assert!(queue.add_job("U1", record(&log, "first")));
    assert!(!queue.add_job("U1", record(&log, "second")));
    assert!(queue.has_job_for_key("U1"));
    assert_eq!(queue.len(), 1);

    queue.spawn();
    settle(&queue).await;

    assert_eq!(*log.lock().unwrap(), vec!["first".to_string()]);
    assert!(!queue.has_job_for_key("U1"));
}

#[tokio::test]
async fn key_can_be_queued_again_while_its_job_runs() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let release = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let gate = Arc::clone(&release);
    let first_log = Arc::clone(&log);
    queue.add_job(
        "U1",
        Box::new(move || {
            async move {
                gate.notified().await;
                first_log.lock().unwrap().push("first".to_string());
                Ok(())
            }
            .boxed()
        }),
    );
    queue.spawn();

    timeout(Duration::from_secs(5), async {
        while queue.status().in_flight.as_deref() != Some("U1") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job never started");

    assert!(!queue.has_job_for_key("U1"));
    assert!(queue.add_job("U1", record(&log, "second")));

    release.notify_one();
    settle(&queue).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["first".to_string(), "second".to_string()]
    );
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jobs_run_in_order_of_first_enqueue() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let log = Arc::new(Mutex::new(Vec::new()));

    queue.add_job("a", record(&log, "a"));
    queue.add_job("b", record(&log, "b"));
    queue.add_job("a", record(&log, "a-again"));
    queue.add_job("c", record(&log, "c"));

    queue.spawn();
    settle(&queue).await;

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn jobs_never_overlap() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    for i in 0..5 {
        let active = Arc::clone(&active);
        let max_seen = Arc::clone(&max_seen);
        queue.add_job(
            format!("job-{i}"),
            Box::new(move || {
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            }),
        );
    }

    queue.spawn();
    settle(&queue).await;

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_job_is_reported_and_the_queue_moves_on() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let log = Arc::new(Mutex::new(Vec::new()));

    queue.add_job(
        "bad",
        failing("store said no"),
    );
    queue.add_job("good", record(&log, "good"));

    queue.spawn();
    settle(&queue).await;

    assert_eq!(*log.lock().unwrap(), vec!["good"]);
    let alerts = alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].reference.as_deref(), Some("bad"));
    assert!(alerts[0].detail.as_deref().unwrap().contains("store said no"));
}

#[tokio::test]
async fn panicking_job_fails_alone() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let log = Arc::new(Mutex::new(Vec::new()));

    queue.add_job(
        "boom",
        Box::new(|| -> BoxFuture<'static, anyhow::Result<()>> {
            async { panic!("broken job") }.boxed()
        }),
    );
    queue.add_job("after", record(&log, "after"));

    queue.spawn();
    settle(&queue).await;

    assert_eq!(*log.lock().unwrap(), vec!["after"]);
    assert_eq!(alerts.alerts().len(), 1);
}

#[tokio::test]
async fn custom_failure_handler_replaces_default_alert() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    let handled = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&handled);
    queue.add_job_with_failure(
        "bad",
        failing("nope"),
        Box::new(move |err: anyhow::Error| {
            async move {
                sink.lock().unwrap().push(err.to_string());
            }
            .boxed()
        }),
    );

    queue.spawn();
    settle(&queue).await;

    assert_eq!(*handled.lock().unwrap(), vec!["nope"]);
    assert!(alerts.alerts().is_empty());
}

// ---------------------------------------------------------------------------
// Gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nothing_runs_until_the_gate_opens() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let switch = Arc::new(Switch::default());
    let queue = TaskQueue::new("gated", switch.clone(), alerts.clone(), fast());
    let log = Arc::new(Mutex::new(Vec::new()));

    queue.add_job("U1", record(&log, "U1"));
    queue.spawn();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(log.lock().unwrap().is_empty());
    assert!(!queue.is_ready());
    assert_eq!(queue.len(), 1);

    switch.0.store(true, Ordering::SeqCst);
    settle(&queue).await;

    assert_eq!(*log.lock().unwrap(), vec!["U1"]);
    assert!(queue.is_ready());
    assert!(queue.status().ready);
}

#[tokio::test]
async fn wait_until_idle_on_empty_queue_returns_at_once() {
    let alerts = Arc::new(MemoryAlertSink::new());
    let queue = ready_queue(&alerts);
    settle(&queue).await;
    assert!(queue.status().is_idle());
}
