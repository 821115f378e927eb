//! One-time whole-store dispatch, recorded as a Job with a single Task.

use std::sync::Arc;

use anyhow::{Context, Result};
use dispatcher_common::{vocab, DerivedFactKind, DestinationClass, JobRecord, JobStatus, RuleTable};
use tracing::{error, info, warn};

use crate::traits::{JobStore, StoreGateway};

pub struct BulkDispatchJob {
    store: Arc<dyn StoreGateway>,
    jobs: Arc<dyn JobStore>,
    rules: Arc<RuleTable>,
    creator: String,
}

impl BulkDispatchJob {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        jobs: Arc<dyn JobStore>,
        rules: Arc<RuleTable>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            store,
            jobs,
            rules,
            creator: creator.into(),
        }
    }

    /// Run the bulk dispatch unless an earlier attempt succeeded.
    ///
    /// A leftover Scheduled or Busy record belongs to a process that died
    /// mid-run; it is force-failed and a fresh attempt is made. Returns the
    /// job record of the attempt that ran, or the earlier successful one.
    pub async fn run(&self) -> Result<JobRecord> {
        let operation = vocab::INITIAL_DISPATCH_JOB_OPERATION;

        let previous = self
            .jobs
            .latest_job(operation, &self.creator)
            .await
            .context("failed to look up previous initial dispatch job")?;

        if let Some(job) = previous {
            match job.status {
                JobStatus::Success => {
                    info!(job = %job.uri, "Initial dispatch already done, skipping");
                    return Ok(job);
                }
                JobStatus::Scheduled | JobStatus::Busy => {
                    warn!(job = %job.uri, status = %job.status, "Found unfinished initial dispatch job, setting it to failed");
                    self.force_fail(&job).await?;
                }
                JobStatus::Failed => {
                    info!(job = %job.uri, "Previous initial dispatch failed, retrying");
                }
            }
        }

        let mut job = self
            .jobs
            .create_job(operation, &self.creator, JobStatus::Busy)
            .await
            .context("failed to create initial dispatch job")?;
        let task = self
            .jobs
            .create_task(
                &job,
                "0",
                vocab::INITIAL_DISPATCH_TASK_OPERATION,
                JobStatus::Scheduled,
            )
            .await
            .context("failed to create initial dispatch task")?;
        job.tasks.push(task.clone());

        info!(job = %job.uri, "Starting initial dispatch");

        match self.dispatch_everything(&task).await {
            Ok(()) => {
                self.jobs.update_status(&task, JobStatus::Success).await?;
                self.jobs.update_status(&job.uri, JobStatus::Success).await?;
                job.status = JobStatus::Success;
                info!(job = %job.uri, "Initial dispatch finished");
                Ok(job)
            }
            Err(err) => {
                error!(job = %job.uri, error = %err, "Initial dispatch failed, closing job with failure state");
                if let Err(e) = self.jobs.update_status(&task, JobStatus::Failed).await {
                    warn!(task = %task, error = %e, "Failed to mark task as failed");
                }
                if let Err(e) = self.jobs.record_error(&job.uri, &format!("{err:#}")).await {
                    warn!(job = %job.uri, error = %e, "Failed to record job error");
                }
                if let Err(e) = self.jobs.update_status(&job.uri, JobStatus::Failed).await {
                    warn!(job = %job.uri, error = %e, "Failed to mark job as failed");
                }
                Err(err)
            }
        }
    }

    async fn dispatch_everything(&self, task: &str) -> Result<()> {
        self.jobs.update_status(task, JobStatus::Busy).await?;

        for rule in self.rules.rules(DestinationClass::Public) {
            self.store
                .dispatch_all(rule)
                .await
                .with_context(|| format!("public dispatch of {} failed", rule.subject_type))?;
        }

        for kind in DerivedFactKind::ALL {
            self.store
                .insert_derived_facts(None, kind)
                .await
                .with_context(|| format!("inserting {kind} facts failed"))?;
        }

        for rule in self.rules.rules(DestinationClass::Org) {
            self.store
                .dispatch_all(rule)
                .await
                .with_context(|| format!("org dispatch of {} failed", rule.subject_type))?;
        }

        Ok(())
    }

    async fn force_fail(&self, job: &JobRecord) -> Result<()> {
        for task in &job.tasks {
            if let Err(e) = self.jobs.update_status(task, JobStatus::Failed).await {
                warn!(task = %task, error = %e, "Could not fail task of stale job");
            }
        }
        self.jobs
            .update_status(&job.uri, JobStatus::Failed)
            .await
            .context("failed to force-fail stale initial dispatch job")?;
        Ok(())
    }
}
