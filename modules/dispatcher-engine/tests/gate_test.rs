//! Bulk dispatch job and the readiness gate built on it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dispatcher_common::{vocab, DerivedFactKind, JobStatus, RuleTable};
use dispatcher_engine::{
    BulkDispatchJob, JobAction, JobStore, MemoryAlertSink, MemoryJobStore, MemoryStore,
    QueueConfig, Readiness, ReadinessGate, TaskQueue,
};
use futures::FutureExt;
use tokio::time::timeout;

const SOURCE: &str = "http://mu.semte.ch/graphs/ingest";
const PUBLIC: &str = "http://mu.semte.ch/graphs/public";
const CREATOR: &str = "http://ex.org/services/dispatcher";
const SYNC_A: &str = "http://ex.org/ops/sync-a";
const SYNC_B: &str = "http://ex.org/ops/sync-b";

const RULES: &str = r#"
[destinations]
path = "?v <http://ex.org/sees> ?unit ; <http://ex.org/uuid> ?uuid ."
graph_prefix = "http://ex.org/graphs/"

[[public]]
type = "http://ex.org/Unit"

[[public]]
type = "http://ex.org/Code"

[[org]]
type = "http://ex.org/Mandate"
path_to_unit = "?anchor <http://ex.org/hasMandate> ?subject ."
"#;

struct Fixture {
    store: Arc<MemoryStore>,
    jobs: Arc<MemoryJobStore>,
    alerts: Arc<MemoryAlertSink>,
}

fn fixture() -> Fixture {
    Fixture {
        store: Arc::new(MemoryStore::new(SOURCE, PUBLIC)),
        jobs: Arc::new(MemoryJobStore::new()),
        alerts: Arc::new(MemoryAlertSink::new()),
    }
}

impl Fixture {
    fn bulk(&self) -> BulkDispatchJob {
        BulkDispatchJob::new(
            self.store.clone(),
            self.jobs.clone(),
            Arc::new(RuleTable::from_toml_str(RULES).unwrap()),
            CREATOR,
        )
    }

    fn gate(&self, prerequisites: &[&str]) -> ReadinessGate {
        ReadinessGate::new(
            self.store.clone(),
            self.jobs.clone(),
            self.alerts.clone(),
            prerequisites.iter().map(|s| s.to_string()).collect(),
            self.bulk(),
        )
    }
}

// =========================================================================
// BulkDispatchJob
// =========================================================================

#[tokio::test]
async fn first_run_dispatches_everything_and_succeeds() {
    let f = fixture();

    let job = f.bulk().run().await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.operation, vocab::INITIAL_DISPATCH_JOB_OPERATION);
    assert_eq!(job.creator, CREATOR);
    assert_eq!(job.tasks.len(), 1);
    assert_eq!(f.jobs.status_of(&job.uri), Some(JobStatus::Success));
    assert_eq!(f.jobs.status_of(&job.tasks[0]), Some(JobStatus::Success));

    // Public rules, then store-wide enrichment, then org rules.
    assert_eq!(
        f.store.bulk_runs(),
        vec!["http://ex.org/Unit", "http://ex.org/Code", "http://ex.org/Mandate"]
    );
    assert_eq!(
        f.store.derived_facts(),
        vec![
            (None, DerivedFactKind::RepresentativeOrganMarker),
            (None, DerivedFactKind::ExternalIdentifier),
        ]
    );
}

#[tokio::test]
async fn earlier_success_is_not_repeated() {
    let f = fixture();
    let done = f
        .jobs
        .create_job(vocab::INITIAL_DISPATCH_JOB_OPERATION, CREATOR, JobStatus::Success)
        .await
        .unwrap();

    let job = f.bulk().run().await.unwrap();

    assert_eq!(job.uri, done.uri);
    assert!(f.store.bulk_runs().is_empty());
    assert_eq!(f.jobs.jobs().len(), 1);
}

#[tokio::test]
async fn leftover_busy_job_is_failed_and_retried_under_a_new_id() {
    let f = fixture();
    let stale = f
        .jobs
        .create_job(vocab::INITIAL_DISPATCH_JOB_OPERATION, CREATOR, JobStatus::Busy)
        .await
        .unwrap();
    let stale_task = f
        .jobs
        .create_task(&stale, "0", vocab::INITIAL_DISPATCH_TASK_OPERATION, JobStatus::Busy)
        .await
        .unwrap();
    let stale = f.jobs.jobs().remove(0);

    let fresh = f.bulk().run().await.unwrap();

    assert_eq!(f.jobs.status_of(&stale.uri), Some(JobStatus::Failed));
    assert_eq!(f.jobs.status_of(&stale_task), Some(JobStatus::Failed));
    assert_ne!(fresh.id, stale.id);
    assert_eq!(fresh.status, JobStatus::Success);
    assert_eq!(f.jobs.jobs().len(), 2);
}

#[tokio::test]
async fn earlier_failure_gets_a_fresh_attempt() {
    let f = fixture();
    f.jobs
        .create_job(vocab::INITIAL_DISPATCH_JOB_OPERATION, CREATOR, JobStatus::Failed)
        .await
        .unwrap();

    let job = f.bulk().run().await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(f.jobs.jobs().len(), 2);
    assert_eq!(f.store.bulk_runs().len(), 3);
}

#[tokio::test]
async fn failed_run_closes_job_and_task_with_an_error() {
    let f = fixture();
    f.store.fail_bulk("connection reset");

    let err = f.bulk().run().await.unwrap_err();
    assert!(format!("{err:#}").contains("connection reset"));

    let job = f.jobs.jobs().remove(0);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(f.jobs.status_of(&job.tasks[0]), Some(JobStatus::Failed));

    let errors = f.jobs.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, job.uri);
}

// =========================================================================
// ReadinessGate
// =========================================================================

#[tokio::test]
async fn gate_waits_for_the_store() {
    let f = fixture();
    f.store.set_reachable(false);
    let gate = f.gate(&[]);

    assert!(!gate.ready().await);
    assert!(f.jobs.jobs().is_empty());

    f.store.set_reachable(true);
    assert!(gate.ready().await);
    assert!(gate.is_open());
}

#[tokio::test]
async fn gate_waits_for_every_prerequisite_sync() {
    let f = fixture();
    let gate = f.gate(&[SYNC_A, SYNC_B]);

    assert!(!gate.ready().await);
    f.jobs.mark_operation_succeeded(SYNC_A);
    assert!(!gate.ready().await);
    assert!(f.store.bulk_runs().is_empty());

    f.jobs.mark_operation_succeeded(SYNC_B);
    assert!(gate.ready().await);
    assert_eq!(f.store.bulk_runs().len(), 3);
}

#[tokio::test]
async fn gate_opens_even_when_the_bulk_run_fails() {
    let f = fixture();
    f.store.fail_bulk("timeout");
    let gate = f.gate(&[]);

    assert!(gate.ready().await);
    assert!(gate.ready().await);

    assert_eq!(f.jobs.jobs().len(), 1);
    let alerts = f.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "Initial dispatch failed");
}

#[tokio::test]
async fn concurrent_checks_run_the_bulk_job_once() {
    let f = fixture();
    let gate = Arc::new(f.gate(&[]));

    let checks: Vec<_> = (0..4)
        .map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.ready().await })
        })
        .collect();
    for check in checks {
        check.await.unwrap();
    }

    assert!(gate.ready().await);
    assert_eq!(f.jobs.jobs().len(), 1);
}

#[tokio::test]
async fn gated_queue_holds_jobs_until_prerequisites_are_met() {
    let f = fixture();
    let gate = Arc::new(f.gate(&[SYNC_A]));
    let queue = TaskQueue::new(
        "gated",
        gate.clone(),
        f.alerts.clone(),
        QueueConfig {
            idle_interval: Duration::from_millis(10),
            readiness_poll_interval: Duration::from_millis(10),
        },
    );

    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    let action: JobAction = Box::new(move || {
        async move {
            *flag.lock().unwrap() = true;
            Ok(())
        }
        .boxed()
    });
    queue.add_job("U1", action);
    queue.spawn();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!*ran.lock().unwrap());
    assert!(f.jobs.jobs().is_empty());

    f.jobs.mark_operation_succeeded(SYNC_A);
    timeout(Duration::from_secs(5), queue.wait_until_idle())
        .await
        .expect("queue did not drain");

    assert!(*ran.lock().unwrap());
    assert_eq!(f.jobs.jobs()[0].status, JobStatus::Success);
}
