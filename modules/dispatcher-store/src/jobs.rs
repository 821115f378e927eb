use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatcher_common::{vocab, DispatchError, DispatchResult, JobRecord, JobStatus};
use dispatcher_engine::JobStore;
use uuid::Uuid;

use crate::client::{values, Binding, SparqlClient};
use crate::queries;

/// Job and task records in the jobs graph.
pub struct SparqlJobStore {
    client: SparqlClient,
    jobs_graph: String,
}

impl SparqlJobStore {
    pub fn new(client: SparqlClient, jobs_graph: impl Into<String>) -> Self {
        Self {
            client,
            jobs_graph: jobs_graph.into(),
        }
    }
}

fn field<'a>(row: &'a Binding, var: &str) -> DispatchResult<&'a str> {
    row.get(var)
        .map(|t| t.value.as_str())
        .ok_or_else(|| DispatchError::Parse(format!("job row without ?{var}")))
}

#[async_trait]
impl JobStore for SparqlJobStore {
    async fn latest_job(
        &self,
        operation: &str,
        creator: &str,
    ) -> DispatchResult<Option<JobRecord>> {
        let rows = self
            .client
            .select(&queries::latest_job(operation, creator))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let uri = field(row, "job")?.to_string();
        let id = Uuid::parse_str(field(row, "uuid")?)
            .map_err(|e| DispatchError::Parse(format!("job {uri} has a bad uuid: {e}")))?;
        let status_iri = field(row, "status")?;
        let status = JobStatus::from_iri(status_iri).ok_or_else(|| {
            DispatchError::Parse(format!("job {uri} has unknown status {status_iri}"))
        })?;
        let created_at = DateTime::parse_from_rfc3339(field(row, "created")?)
            .map_err(|e| DispatchError::Parse(format!("job {uri} has a bad creation date: {e}")))?
            .with_timezone(&Utc);

        let task_rows = self.client.select(&queries::tasks_of(&uri)).await?;

        Ok(Some(JobRecord {
            tasks: values(&task_rows, "task"),
            uri,
            id,
            operation: operation.to_string(),
            creator: creator.to_string(),
            status,
            created_at,
        }))
    }

    async fn create_job(
        &self,
        operation: &str,
        creator: &str,
        status: JobStatus,
    ) -> DispatchResult<JobRecord> {
        let id = Uuid::new_v4();
        let uri = format!("{}{id}", vocab::JOB_URI_PREFIX);
        let created_at = Utc::now();

        self.client
            .update(&queries::insert_job(
                &self.jobs_graph,
                &uri,
                &id.to_string(),
                operation,
                creator,
                status,
                &created_at,
            ))
            .await?;

        Ok(JobRecord {
            uri,
            id,
            operation: operation.to_string(),
            creator: creator.to_string(),
            status,
            created_at,
            tasks: Vec::new(),
        })
    }

    async fn create_task(
        &self,
        job: &JobRecord,
        index: &str,
        operation: &str,
        status: JobStatus,
    ) -> DispatchResult<String> {
        let id = Uuid::new_v4().to_string();
        let uri = format!("{}{id}", vocab::TASK_URI_PREFIX);

        self.client
            .update(&queries::insert_task(
                &self.jobs_graph,
                &uri,
                &id,
                &job.uri,
                index,
                operation,
                status,
                &Utc::now(),
            ))
            .await?;
        Ok(uri)
    }

    async fn update_status(&self, uri: &str, status: JobStatus) -> DispatchResult<()> {
        self.client
            .update(&queries::update_status(uri, status, &Utc::now()))
            .await?;
        Ok(())
    }

    async fn record_error(&self, job_uri: &str, message: &str) -> DispatchResult<()> {
        let id = Uuid::new_v4().to_string();
        let uri = format!("{}{id}", vocab::JOB_ERROR_URI_PREFIX);
        self.client
            .update(&queries::insert_job_error(
                &self.jobs_graph,
                &uri,
                &id,
                job_uri,
                message,
            ))
            .await?;
        Ok(())
    }

    async fn has_successful_job(&self, operation: &str) -> DispatchResult<bool> {
        Ok(self
            .client
            .ask(&queries::has_successful_job(operation))
            .await?)
    }
}
