//! Collaborator contracts for the dispatch engine.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dispatcher_common::{
    Alert, DerivedFactKind, Destinations, DispatchResult, GraphId, JobRecord, JobStatus,
    RuleEntry, Subject,
};

/// Read, copy and enrich operations against the triple store.
///
/// Implemented by `SparqlGateway` (production) and `MemoryStore` (tests).
/// Every failure is recoverable at the job level.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Liveness probe used by the readiness gate.
    async fn is_reachable(&self) -> bool;

    /// All `rdf:type`s of the subject.
    async fn types_of(&self, subject: &Subject) -> DispatchResult<BTreeSet<String>>;

    /// Whether the subject satisfies the rule's eligibility filter.
    /// True when the rule has no filter.
    async fn evaluate_filter(&self, subject: &Subject, rule: &RuleEntry) -> DispatchResult<bool>;

    /// The organizational unit reached from `subject` through the rule's path.
    async fn owning_unit(
        &self,
        subject: &Subject,
        rule: &RuleEntry,
    ) -> DispatchResult<Option<Subject>>;

    /// Subjects bound to `?subject` when `path` is evaluated with `?anchor`
    /// fixed to `anchor`. Restricted to `subject_type` when given. With
    /// `placed_in`, subjects already in all of its graphs and in no other
    /// graph of its class are left out.
    async fn resolve_related(
        &self,
        anchor: &Subject,
        subject_type: Option<&str>,
        path: &str,
        placed_in: Option<&Destinations>,
    ) -> DispatchResult<BTreeSet<Subject>>;

    /// Organization graphs allowed to see the unit. May be empty.
    async fn destination_graphs_for(&self, unit: &Subject) -> DispatchResult<BTreeSet<GraphId>>;

    /// Copy every statement about the subject into each destination graph and
    /// retract it from the other graphs of the same class. The source graph
    /// and graphs of the other class are left untouched.
    async fn copy_subject_data(
        &self,
        subject: &Subject,
        destinations: &Destinations,
    ) -> DispatchResult<()>;

    /// Insert one kind of derived facts. `None` enriches the whole store.
    async fn insert_derived_facts(
        &self,
        subject: Option<&Subject>,
        kind: DerivedFactKind,
    ) -> DispatchResult<()>;

    /// Apply one rule to every matching subject in the store.
    async fn dispatch_all(&self, rule: &RuleEntry) -> DispatchResult<()>;
}

/// Audit trail of the one-time bulk dispatch.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Most recent job for the operation created by `creator`.
    async fn latest_job(&self, operation: &str, creator: &str)
        -> DispatchResult<Option<JobRecord>>;

    async fn create_job(
        &self,
        operation: &str,
        creator: &str,
        status: JobStatus,
    ) -> DispatchResult<JobRecord>;

    /// Attach a task to the job; returns the task IRI.
    async fn create_task(
        &self,
        job: &JobRecord,
        index: &str,
        operation: &str,
        status: JobStatus,
    ) -> DispatchResult<String>;

    /// Move a job or task to `status`.
    async fn update_status(&self, uri: &str, status: JobStatus) -> DispatchResult<()>;

    async fn record_error(&self, job_uri: &str, message: &str) -> DispatchResult<()>;

    /// Whether any job of the operation reached Success.
    async fn has_successful_job(&self, operation: &str) -> DispatchResult<bool>;
}

/// Operator-visible failure channel. Delivery problems are logged by the
/// sink, never surfaced to the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: Alert);
}

/// Decides whether a queue may start draining.
#[async_trait]
pub trait Readiness: Send + Sync {
    async fn ready(&self) -> bool;
}

/// Ready from the start.
pub struct AlwaysReady;

#[async_trait]
impl Readiness for AlwaysReady {
    async fn ready(&self) -> bool {
        true
    }
}
