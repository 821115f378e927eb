//! Single-consumer job queue with per-key deduplication and a readiness gate.
//!
//! Each queue owns one drain task. Jobs run one at a time in FIFO order of
//! first enqueue; a job whose key is already pending is dropped. The loop
//! drains fully before sleeping, wakes on enqueue (bounded by the idle
//! interval) and does nothing until its `Readiness` says so.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use dispatcher_common::Alert;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::traits::{AlertSink, Readiness};

/// Deferred unit of work. Built by the producer, run once by the drain loop.
pub type JobAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Called with the error when a job's action fails.
pub type FailureHandler = Box<dyn FnOnce(anyhow::Error) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on how long an idle queue sleeps before re-checking.
    pub idle_interval: Duration,
    /// How often a not-ready queue asks its gate again.
    pub readiness_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(100),
            readiness_poll_interval: Duration::from_secs(10),
        }
    }
}

/// Point-in-time view of a queue, served by `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub name: String,
    pub pending: usize,
    /// Key of the job currently executing.
    pub in_flight: Option<String>,
    pub ready: bool,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.in_flight.is_none()
    }
}

struct Job {
    key: String,
    action: JobAction,
    on_failure: Option<FailureHandler>,
}

#[derive(Default)]
struct Pending {
    jobs: VecDeque<Job>,
    keys: HashSet<String>,
    in_flight: Option<String>,
}

struct Shared {
    name: String,
    pending: Mutex<Pending>,
    wake: Notify,
    readiness: Arc<dyn Readiness>,
    ready: AtomicBool,
    accepted: AtomicU64,
    status: watch::Sender<QueueStatus>,
    alerts: Arc<dyn AlertSink>,
    config: QueueConfig,
}

/// Cloneable handle; every clone feeds the same drain loop.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    pub fn new(
        name: impl Into<String>,
        readiness: Arc<dyn Readiness>,
        alerts: Arc<dyn AlertSink>,
        config: QueueConfig,
    ) -> Self {
        let name = name.into();
        let (status, _) = watch::channel(QueueStatus {
            name: name.clone(),
            pending: 0,
            in_flight: None,
            ready: false,
        });

        Self {
            shared: Arc::new(Shared {
                name,
                pending: Mutex::new(Pending::default()),
                wake: Notify::new(),
                readiness,
                ready: AtomicBool::new(false),
                accepted: AtomicU64::new(0),
                status,
                alerts,
                config,
            }),
        }
    }

    /// Enqueue `action` under `key` with the default failure handling
    /// (log and alert). Returns false when a job for `key` is already pending.
    pub fn add_job(&self, key: impl Into<String>, action: JobAction) -> bool {
        self.push(Job {
            key: key.into(),
            action,
            on_failure: None,
        })
    }

    /// Like `add_job`, with a custom failure handler.
    pub fn add_job_with_failure(
        &self,
        key: impl Into<String>,
        action: JobAction,
        on_failure: FailureHandler,
    ) -> bool {
        self.push(Job {
            key: key.into(),
            action,
            on_failure: Some(on_failure),
        })
    }

    /// Whether a job for `key` is waiting. The job currently executing does
    /// not count, so a change arriving mid-run still gets its own pass.
    pub fn has_job_for_key(&self, key: &str) -> bool {
        self.lock().keys.contains(key)
    }

    /// Number of pending jobs, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// Total jobs ever accepted. Moves whenever new work enters the queue.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> QueueStatus {
        self.shared.status.borrow().clone()
    }

    /// Resolves once nothing is pending or in flight. Never resolves for a
    /// queue with pending work that is not ready.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.status.subscribe();
        // The sender lives in `shared`, so the channel cannot close here.
        let _ = rx.wait_for(QueueStatus::is_idle).await;
    }

    /// Start the drain loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let queue = self.clone();
        info!(queue = %self.shared.name, "Queue started");
        tokio::spawn(async move { queue.run().await })
    }

    // --- Internals ---

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, job: Job) -> bool {
        {
            let mut pending = self.lock();
            if !pending.keys.insert(job.key.clone()) {
                debug!(queue = %self.shared.name, key = %job.key, "Job already pending, skipping");
                return false;
            }
            pending.jobs.push_back(job);
            self.shared.accepted.fetch_add(1, Ordering::SeqCst);
            self.publish(&pending);
        }
        self.shared.wake.notify_one();
        true
    }

    fn publish(&self, pending: &Pending) {
        self.shared.status.send_replace(QueueStatus {
            name: self.shared.name.clone(),
            pending: pending.jobs.len(),
            in_flight: pending.in_flight.clone(),
            ready: self.is_ready(),
        });
    }

    fn pop(&self) -> Option<Job> {
        let mut pending = self.lock();
        let job = pending.jobs.pop_front()?;
        pending.keys.remove(&job.key);
        pending.in_flight = Some(job.key.clone());
        self.publish(&pending);
        Some(job)
    }

    fn finish(&self) {
        let mut pending = self.lock();
        pending.in_flight = None;
        self.publish(&pending);
    }

    async fn run(self) {
        loop {
            if !self.check_ready().await {
                tokio::time::sleep(self.shared.config.readiness_poll_interval).await;
                continue;
            }

            self.drain().await;

            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(self.shared.config.idle_interval) => {}
            }
        }
    }

    async fn check_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        if !self.shared.readiness.ready().await {
            debug!(queue = %self.shared.name, "Queue not ready yet");
            return false;
        }

        self.shared.ready.store(true, Ordering::SeqCst);
        self.publish(&self.lock());
        info!(queue = %self.shared.name, "Queue ready, draining");
        true
    }

    async fn drain(&self) {
        while let Some(Job {
            key,
            action,
            on_failure,
        }) = self.pop()
        {
            debug!(queue = %self.shared.name, key = %key, "Running job");

            // Spawned so a panicking action fails its job instead of the loop.
            let result = match tokio::spawn(action()).await {
                Ok(result) => result,
                Err(join_err) => Err(anyhow!("job panicked: {join_err}")),
            };

            if let Err(err) = result {
                match on_failure {
                    Some(handler) => handler(err).await,
                    None => self.report_failure(&key, err).await,
                }
            }

            self.finish();
        }
    }

    async fn report_failure(&self, key: &str, err: anyhow::Error) {
        error!(queue = %self.shared.name, key = %key, error = %err, "Job failed");
        self.shared
            .alerts
            .send_alert(
                Alert::new(format!("Job on queue {} failed", self.shared.name))
                    .with_detail(format!("{err:#}"))
                    .with_reference(key),
            )
            .await;
    }
}
