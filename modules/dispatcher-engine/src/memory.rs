//! In-memory collaborators (tests, no database required).
//!
//! `MemoryStore` models graph placement per subject rather than individual
//! triples: a subject sits in the source graph plus whatever graphs the last
//! copy of each class put it in. The public graph is the only public-class
//! graph; every other graph except the source is an organization graph.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use dispatcher_common::{
    vocab, Alert, DerivedFactKind, DestinationClass, Destinations, DispatchError, DispatchResult,
    GraphId, JobRecord, JobStatus, RuleEntry, Subject,
};
use uuid::Uuid;

use crate::traits::{AlertSink, JobStore, StoreGateway};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    reachable: bool,
    types: HashMap<Subject, BTreeSet<String>>,
    filters: HashMap<(Subject, String), bool>,
    units: HashMap<(Subject, String), Subject>,
    related: HashMap<(Subject, String), BTreeSet<Subject>>,
    destinations: HashMap<Subject, BTreeSet<GraphId>>,
    placement: HashMap<Subject, BTreeSet<GraphId>>,
    unavailable: HashSet<Subject>,
    failing_copies: HashSet<Subject>,
    bulk_failure: Option<String>,
    copies: Vec<(Subject, BTreeSet<GraphId>)>,
    derived: Vec<(Option<Subject>, DerivedFactKind)>,
    bulk_runs: Vec<String>,
}

/// Programmable store. Unknown filters pass, unknown units are absent and
/// unknown paths resolve to nothing.
pub struct MemoryStore {
    source_graph: GraphId,
    public_graph: GraphId,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(source_graph: impl Into<String>, public_graph: impl Into<String>) -> Self {
        Self {
            source_graph: GraphId::new(source_graph),
            public_graph: GraphId::new(public_graph),
            state: Mutex::new(StoreState {
                reachable: true,
                ..Default::default()
            }),
        }
    }

    /// Ingest a subject: it gets its types and lands in the source graph.
    pub fn add_subject(&self, subject: &str, types: &[&str]) {
        let mut state = lock(&self.state);
        let subject = Subject::from(subject);
        state
            .types
            .entry(subject.clone())
            .or_default()
            .extend(types.iter().map(|t| t.to_string()));
        state
            .placement
            .entry(subject)
            .or_default()
            .insert(self.source_graph.clone());
    }

    /// Put a subject into a graph directly, as a stale earlier dispatch would.
    pub fn place(&self, subject: &str, graph: &str) {
        lock(&self.state)
            .placement
            .entry(Subject::from(subject))
            .or_default()
            .insert(GraphId::from(graph));
    }

    pub fn set_filter(&self, subject: &str, subject_type: &str, passes: bool) {
        lock(&self.state)
            .filters
            .insert((Subject::from(subject), subject_type.to_string()), passes);
    }

    pub fn set_unit(&self, subject: &str, subject_type: &str, unit: &str) {
        lock(&self.state)
            .units
            .insert((Subject::from(subject), subject_type.to_string()), Subject::from(unit));
    }

    /// Subjects reached from `anchor` through `path`.
    pub fn set_related(&self, anchor: &str, path: &str, subjects: &[&str]) {
        lock(&self.state).related.insert(
            (Subject::from(anchor), path.to_string()),
            subjects.iter().map(|s| Subject::from(*s)).collect(),
        );
    }

    pub fn set_destinations(&self, unit: &str, graphs: &[&str]) {
        lock(&self.state).destinations.insert(
            Subject::from(unit),
            graphs.iter().map(|g| GraphId::from(*g)).collect(),
        );
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// Every lookup about the subject fails as if the store were down.
    pub fn set_unavailable(&self, subject: &str) {
        lock(&self.state).unavailable.insert(Subject::from(subject));
    }

    pub fn fail_copies_of(&self, subject: &str) {
        lock(&self.state).failing_copies.insert(Subject::from(subject));
    }

    pub fn fail_bulk(&self, message: &str) {
        lock(&self.state).bulk_failure = Some(message.to_string());
    }

    // --- Assertions ---

    pub fn graphs_of(&self, subject: &str) -> BTreeSet<GraphId> {
        lock(&self.state)
            .placement
            .get(&Subject::from(subject))
            .cloned()
            .unwrap_or_default()
    }

    /// Every completed copy, in order.
    pub fn copies(&self) -> Vec<(Subject, BTreeSet<GraphId>)> {
        lock(&self.state).copies.clone()
    }

    pub fn copy_count(&self, subject: &str) -> usize {
        let subject = Subject::from(subject);
        lock(&self.state)
            .copies
            .iter()
            .filter(|(s, _)| *s == subject)
            .count()
    }

    pub fn derived_facts(&self) -> Vec<(Option<Subject>, DerivedFactKind)> {
        lock(&self.state).derived.clone()
    }

    /// Subject types of the rules applied by `dispatch_all`, in order.
    pub fn bulk_runs(&self) -> Vec<String> {
        lock(&self.state).bulk_runs.clone()
    }

    fn check_available(state: &StoreState, subject: &Subject) -> DispatchResult<()> {
        if state.unavailable.contains(subject) {
            return Err(DispatchError::StoreUnavailable(format!(
                "lookup of {subject} timed out"
            )));
        }
        Ok(())
    }

    fn class_of(&self, graph: &GraphId) -> Option<DestinationClass> {
        if *graph == self.source_graph {
            None
        } else if *graph == self.public_graph {
            Some(DestinationClass::Public)
        } else {
            Some(DestinationClass::Org)
        }
    }

    /// Whether the subject already sits in all destination graphs and in no
    /// other graph of their class.
    fn correctly_placed(&self, state: &StoreState, subject: &Subject, destinations: &Destinations) -> bool {
        let Some(placed) = state.placement.get(subject) else {
            return false;
        };
        destinations.graphs.is_subset(placed)
            && placed.iter().all(|g| {
                destinations.graphs.contains(g) || self.class_of(g) != Some(destinations.class)
            })
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn is_reachable(&self) -> bool {
        lock(&self.state).reachable
    }

    async fn types_of(&self, subject: &Subject) -> DispatchResult<BTreeSet<String>> {
        let state = lock(&self.state);
        Self::check_available(&state, subject)?;
        Ok(state.types.get(subject).cloned().unwrap_or_default())
    }

    async fn evaluate_filter(&self, subject: &Subject, rule: &RuleEntry) -> DispatchResult<bool> {
        if rule.eligibility_filter.is_none() {
            return Ok(true);
        }
        let state = lock(&self.state);
        Self::check_available(&state, subject)?;
        Ok(state
            .filters
            .get(&(subject.clone(), rule.subject_type.clone()))
            .copied()
            .unwrap_or(true))
    }

    async fn owning_unit(
        &self,
        subject: &Subject,
        rule: &RuleEntry,
    ) -> DispatchResult<Option<Subject>> {
        let state = lock(&self.state);
        Self::check_available(&state, subject)?;
        Ok(state
            .units
            .get(&(subject.clone(), rule.subject_type.clone()))
            .cloned())
    }

    async fn resolve_related(
        &self,
        anchor: &Subject,
        subject_type: Option<&str>,
        path: &str,
        placed_in: Option<&Destinations>,
    ) -> DispatchResult<BTreeSet<Subject>> {
        let state = lock(&self.state);
        Self::check_available(&state, anchor)?;

        let Some(found) = state.related.get(&(anchor.clone(), path.to_string())) else {
            return Ok(BTreeSet::new());
        };

        Ok(found
            .iter()
            .filter(|s| match subject_type {
                Some(t) => state.types.get(*s).is_some_and(|types| types.contains(t)),
                None => true,
            })
            .filter(|s| match placed_in {
                Some(destinations) => !self.correctly_placed(&state, s, destinations),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn destination_graphs_for(&self, unit: &Subject) -> DispatchResult<BTreeSet<GraphId>> {
        let state = lock(&self.state);
        Self::check_available(&state, unit)?;
        Ok(state.destinations.get(unit).cloned().unwrap_or_default())
    }

    async fn copy_subject_data(
        &self,
        subject: &Subject,
        destinations: &Destinations,
    ) -> DispatchResult<()> {
        let mut state = lock(&self.state);
        if state.failing_copies.contains(subject) {
            return Err(DispatchError::dispatch_failure(
                subject.as_str(),
                "update rejected by store",
            ));
        }

        let placed = state.placement.entry(subject.clone()).or_default();
        placed.retain(|g| {
            destinations.graphs.contains(g) || self.class_of(g) != Some(destinations.class)
        });
        placed.extend(destinations.graphs.iter().cloned());

        state.copies.push((subject.clone(), destinations.graphs.clone()));
        Ok(())
    }

    async fn insert_derived_facts(
        &self,
        subject: Option<&Subject>,
        kind: DerivedFactKind,
    ) -> DispatchResult<()> {
        lock(&self.state).derived.push((subject.cloned(), kind));
        Ok(())
    }

    async fn dispatch_all(&self, rule: &RuleEntry) -> DispatchResult<()> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.bulk_failure {
            return Err(DispatchError::StoreUnavailable(message.clone()));
        }
        state.bulk_runs.push(rule.subject_type.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct JobState {
    jobs: Vec<JobRecord>,
    tasks: HashMap<String, JobStatus>,
    errors: Vec<(String, String)>,
    succeeded_operations: HashSet<String>,
}

/// Job audit trail that enforces forward-only status moves.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<JobState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an upstream operation completed, as a prerequisite sync would.
    pub fn mark_operation_succeeded(&self, operation: &str) {
        lock(&self.state)
            .succeeded_operations
            .insert(operation.to_string());
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        lock(&self.state).jobs.clone()
    }

    /// Current status of a job or task.
    pub fn status_of(&self, uri: &str) -> Option<JobStatus> {
        let state = lock(&self.state);
        state
            .jobs
            .iter()
            .find(|j| j.uri == uri)
            .map(|j| j.status)
            .or_else(|| state.tasks.get(uri).copied())
    }

    /// `(job_uri, message)` pairs recorded against jobs.
    pub fn errors(&self) -> Vec<(String, String)> {
        lock(&self.state).errors.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn latest_job(
        &self,
        operation: &str,
        creator: &str,
    ) -> DispatchResult<Option<JobRecord>> {
        Ok(lock(&self.state)
            .jobs
            .iter()
            .rev()
            .find(|j| j.operation == operation && j.creator == creator)
            .cloned())
    }

    async fn create_job(
        &self,
        operation: &str,
        creator: &str,
        status: JobStatus,
    ) -> DispatchResult<JobRecord> {
        let id = Uuid::new_v4();
        let job = JobRecord {
            uri: format!("{}{id}", vocab::JOB_URI_PREFIX),
            id,
            operation: operation.to_string(),
            creator: creator.to_string(),
            status,
            created_at: Utc::now(),
            tasks: Vec::new(),
        };
        lock(&self.state).jobs.push(job.clone());
        Ok(job)
    }

    async fn create_task(
        &self,
        job: &JobRecord,
        _index: &str,
        _operation: &str,
        status: JobStatus,
    ) -> DispatchResult<String> {
        let uri = format!("{}{}", vocab::TASK_URI_PREFIX, Uuid::new_v4());
        let mut state = lock(&self.state);
        let record = state
            .jobs
            .iter_mut()
            .find(|j| j.uri == job.uri)
            .ok_or_else(|| DispatchError::Anyhow(anyhow!("unknown job {}", job.uri)))?;
        record.tasks.push(uri.clone());
        state.tasks.insert(uri.clone(), status);
        Ok(uri)
    }

    async fn update_status(&self, uri: &str, status: JobStatus) -> DispatchResult<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;

        let current = if let Some(job) = state.jobs.iter_mut().find(|j| j.uri == uri) {
            &mut job.status
        } else if let Some(task) = state.tasks.get_mut(uri) {
            task
        } else {
            return Err(DispatchError::Anyhow(anyhow!("unknown job or task {uri}")));
        };

        if !current.can_transition_to(status) {
            return Err(DispatchError::Anyhow(anyhow!(
                "illegal status change of {uri}: {current} -> {status}"
            )));
        }
        *current = status;
        Ok(())
    }

    async fn record_error(&self, job_uri: &str, message: &str) -> DispatchResult<()> {
        lock(&self.state)
            .errors
            .push((job_uri.to_string(), message.to_string()));
        Ok(())
    }

    async fn has_successful_job(&self, operation: &str) -> DispatchResult<bool> {
        let state = lock(&self.state);
        Ok(state.succeeded_operations.contains(operation)
            || state
                .jobs
                .iter()
                .any(|j| j.operation == operation && j.status == JobStatus::Success))
    }
}

// ---------------------------------------------------------------------------
// MemoryAlertSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn send_alert(&self, alert: Alert) {
        lock(&self.alerts).push(alert);
    }
}
