//! Per-subject dispatch decisions.
//!
//! A subject is processed on the subject queue: its types select public and
//! org rules, eligible public rules schedule a copy to the public graph, and
//! org rules schedule a dispatch of the owning unit's whole neighbourhood.
//! Public copies may cascade into further subject processing, bounded by a
//! per-job depth.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dispatcher_common::{Alert, DestinationClass, Destinations, GraphId, RuleTable, Subject};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::{FailureHandler, QueueStatus, TaskQueue};
use crate::traits::{AlertSink, StoreGateway};

/// The three queues of a running dispatcher.
#[derive(Clone)]
pub struct DispatchQueues {
    /// `process_subject` jobs, keyed by subject.
    pub subjects: TaskQueue,
    /// Copies to the public graph, keyed by subject.
    pub public: TaskQueue,
    /// Organization graph dispatches, keyed by organizational unit.
    pub org: TaskQueue,
}

impl DispatchQueues {
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.all().iter().map(|q| q.spawn()).collect()
    }

    pub fn statuses(&self) -> Vec<QueueStatus> {
        self.all().iter().map(|q| q.status()).collect()
    }

    /// Resolves once all three queues are idle at the same time with no work
    /// accepted in between.
    pub async fn wait_until_idle(&self) {
        loop {
            let before = self.accepted();
            for queue in self.all() {
                queue.wait_until_idle().await;
            }
            let idle = self.all().iter().all(|q| q.status().is_idle());
            if idle && self.accepted() == before {
                return;
            }
        }
    }

    fn all(&self) -> [&TaskQueue; 3] {
        [&self.subjects, &self.public, &self.org]
    }

    fn accepted(&self) -> u64 {
        self.all().iter().map(|q| q.accepted()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub public_graph: GraphId,
    /// Deepest cascade level still scheduled. Subjects from a delta are at 0.
    pub max_cascade_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            public_graph: GraphId::new("http://mu.semte.ch/graphs/public"),
            max_cascade_depth: 8,
        }
    }
}

pub struct DispatchEngine {
    rules: Arc<RuleTable>,
    store: Arc<dyn StoreGateway>,
    alerts: Arc<dyn AlertSink>,
    queues: DispatchQueues,
    config: EngineConfig,
}

impl DispatchEngine {
    pub fn new(
        rules: Arc<RuleTable>,
        store: Arc<dyn StoreGateway>,
        alerts: Arc<dyn AlertSink>,
        queues: DispatchQueues,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            rules,
            store,
            alerts,
            queues,
            config,
        })
    }

    pub fn queues(&self) -> &DispatchQueues {
        &self.queues
    }

    /// Start the drain loops of all queues.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.queues.spawn()
    }

    /// Schedule a subject from a delta. Returns false when it is already
    /// waiting to be processed.
    pub fn schedule_subject(self: &Arc<Self>, subject: Subject) -> bool {
        self.enqueue_process(subject, 0)
    }

    /// Decide where the subject goes and schedule the matching dispatch jobs.
    pub async fn process_subject(self: &Arc<Self>, subject: &Subject, depth: u32) -> Result<()> {
        let types = self
            .store
            .types_of(subject)
            .await
            .with_context(|| format!("failed to fetch types of {subject}"))?;

        let public_rules = self.rules.rules_for_types(&types, DestinationClass::Public);
        let org_rules = self.rules.rules_for_types(&types, DestinationClass::Org);

        if public_rules.is_empty() && org_rules.is_empty() {
            debug!(subject = %subject, "No dispatch rules match");
            return Ok(());
        }

        let mut eligible = false;
        let mut triggers: Vec<String> = Vec::new();
        for rule in public_rules {
            let passes = self
                .store
                .evaluate_filter(subject, rule)
                .await
                .with_context(|| format!("filter of {} failed for {subject}", rule.subject_type))?;
            if !passes {
                debug!(subject = %subject, rule = %rule.subject_type, "Filter rejected subject");
                continue;
            }

            eligible = true;
            for kind in &rule.derived_facts {
                self.store
                    .insert_derived_facts(Some(subject), *kind)
                    .await
                    .with_context(|| format!("inserting {kind} facts for {subject} failed"))?;
            }
            for trigger in &rule.cascade_triggers {
                if !triggers.contains(trigger) {
                    triggers.push(trigger.clone());
                }
            }
        }

        if eligible {
            self.enqueue_public(subject.clone(), triggers, depth);
        }

        for rule in org_rules {
            let unit = self
                .store
                .owning_unit(subject, rule)
                .await
                .with_context(|| format!("unit lookup of {subject} via {} failed", rule.subject_type))?;
            match unit {
                Some(unit) => self.enqueue_org(unit),
                None => {
                    debug!(subject = %subject, rule = %rule.subject_type, "No organizational unit found")
                }
            }
        }

        Ok(())
    }

    // --- Scheduling ---

    fn enqueue_process(self: &Arc<Self>, subject: Subject, depth: u32) -> bool {
        let key = subject.to_string();
        if self.queues.subjects.has_job_for_key(&key) {
            return false;
        }

        let engine = Arc::clone(self);
        let on_failure = self.alert_on_failure("Error while processing subject", subject.clone());
        self.queues.subjects.add_job_with_failure(
            key,
            Box::new(move || async move { engine.process_subject(&subject, depth).await }.boxed()),
            on_failure,
        )
    }

    fn enqueue_public(self: &Arc<Self>, subject: Subject, triggers: Vec<String>, depth: u32) {
        let key = subject.to_string();
        if self.queues.public.has_job_for_key(&key) {
            debug!(subject = %subject, "Public dispatch already pending");
            return;
        }

        let engine = Arc::clone(self);
        let on_failure =
            self.alert_on_failure("Error while dispatching subject to public graph", subject.clone());
        self.queues.public.add_job_with_failure(
            key,
            Box::new(move || {
                async move { engine.dispatch_public(&subject, &triggers, depth).await }.boxed()
            }),
            on_failure,
        );
    }

    fn enqueue_org(self: &Arc<Self>, unit: Subject) {
        let key = unit.to_string();
        if self.queues.org.has_job_for_key(&key) {
            debug!(unit = %unit, "Org dispatch already pending");
            return;
        }

        let engine = Arc::clone(self);
        let on_failure =
            self.alert_on_failure("Error while dispatching to organization graphs", unit.clone());
        self.queues.org.add_job_with_failure(
            key,
            Box::new(move || async move { engine.dispatch_org(&unit).await }.boxed()),
            on_failure,
        );
    }

    fn alert_on_failure(&self, message: &'static str, reference: Subject) -> FailureHandler {
        let alerts = Arc::clone(&self.alerts);
        Box::new(move |err: anyhow::Error| {
            async move {
                error!(subject = %reference, error = %err, "{}", message);
                alerts
                    .send_alert(
                        Alert::new(message)
                            .with_detail(format!("{err:#}"))
                            .with_reference(reference.to_string()),
                    )
                    .await;
            }
            .boxed()
        })
    }

    // --- Jobs ---

    async fn dispatch_public(
        self: &Arc<Self>,
        subject: &Subject,
        triggers: &[String],
        depth: u32,
    ) -> Result<()> {
        let destinations = Destinations::public(self.config.public_graph.clone());
        self.store
            .copy_subject_data(subject, &destinations)
            .await
            .with_context(|| format!("copy of {subject} to the public graph failed"))?;
        info!(subject = %subject, "Dispatched to public graph");

        if !triggers.is_empty() {
            self.cascade(subject, triggers, depth, &destinations).await?;
        }
        Ok(())
    }

    /// Re-process every subject reachable through the trigger paths that is
    /// not in the public graph yet.
    async fn cascade(
        self: &Arc<Self>,
        subject: &Subject,
        triggers: &[String],
        depth: u32,
        public: &Destinations,
    ) -> Result<()> {
        let mut related = BTreeSet::new();
        for trigger in triggers {
            let found = self
                .store
                .resolve_related(subject, None, trigger, Some(public))
                .await
                .with_context(|| format!("cascade lookup from {subject} failed"))?;
            related.extend(found);
        }
        related.remove(subject);

        if related.is_empty() {
            return Ok(());
        }

        let next = depth + 1;
        if next > self.config.max_cascade_depth {
            warn!(
                subject = %subject,
                depth = next,
                related = related.len(),
                "Cascade depth limit reached, not re-processing related subjects"
            );
            self.alerts
                .send_alert(
                    Alert::new("Cascade depth limit reached")
                        .with_detail(format!(
                            "{} related subjects not re-processed at depth {next}",
                            related.len()
                        ))
                        .with_reference(subject.to_string()),
                )
                .await;
            return Ok(());
        }

        for other in related {
            if self.enqueue_process(other.clone(), next) {
                debug!(subject = %other, cause = %subject, depth = next, "Cascading re-process");
            }
        }
        Ok(())
    }

    /// Copy the unit and everything that hangs off it into the unit's
    /// organization graphs. Copy failures of individual subjects do not stop
    /// the rest; they fail the job together at the end.
    async fn dispatch_org(self: &Arc<Self>, unit: &Subject) -> Result<()> {
        let graphs = self
            .store
            .destination_graphs_for(unit)
            .await
            .with_context(|| format!("destination lookup of {unit} failed"))?;
        let destinations = Destinations::org(graphs);

        if destinations.is_empty() {
            info!(unit = %unit, "No organization graphs for unit, nothing to dispatch");
            return Ok(());
        }

        let mut related = BTreeSet::new();
        for rule in self.rules.rules(DestinationClass::Org) {
            let Some(path) = rule.path_to_unit.as_deref() else {
                continue;
            };
            let found = self
                .store
                .resolve_related(unit, Some(&rule.subject_type), path, Some(&destinations))
                .await
                .with_context(|| format!("related lookup of {} for {unit} failed", rule.subject_type))?;
            related.extend(found);
        }
        related.remove(unit);

        let total = related.len() + 1;
        let mut failures = Vec::new();
        for subject in std::iter::once(unit).chain(related.iter()) {
            if let Err(e) = self.store.copy_subject_data(subject, &destinations).await {
                warn!(subject = %subject, unit = %unit, error = %e, "Copy to organization graphs failed");
                failures.push(format!("{subject}: {e}"));
            }
        }

        if !failures.is_empty() {
            bail!(
                "{} of {total} subjects failed to dispatch for {unit}: {}",
                failures.len(),
                failures.join("; ")
            );
        }

        info!(unit = %unit, subjects = total, graphs = destinations.len(), "Dispatched to organization graphs");
        Ok(())
    }
}
