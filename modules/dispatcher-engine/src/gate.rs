//! Readiness gate shared by the dispatch queues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dispatcher_common::{Alert, DispatchResult};
use tracing::{debug, error, info, warn};

use crate::bulk::BulkDispatchJob;
use crate::traits::{AlertSink, JobStore, Readiness, StoreGateway};

/// Opens once the store answers, every prerequisite upstream sync has
/// succeeded and the bulk dispatch has run. Stays open for the rest of the
/// process, whether the bulk dispatch succeeded or not.
pub struct ReadinessGate {
    store: Arc<dyn StoreGateway>,
    jobs: Arc<dyn JobStore>,
    alerts: Arc<dyn AlertSink>,
    prerequisites: Vec<String>,
    bulk: BulkDispatchJob,
    bulk_in_flight: AtomicBool,
    ready: AtomicBool,
}

impl ReadinessGate {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        jobs: Arc<dyn JobStore>,
        alerts: Arc<dyn AlertSink>,
        prerequisites: Vec<String>,
        bulk: BulkDispatchJob,
    ) -> Self {
        Self {
            store,
            jobs,
            alerts,
            prerequisites,
            bulk,
            bulk_in_flight: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn prerequisites_done(&self) -> DispatchResult<bool> {
        for operation in &self.prerequisites {
            if !self.jobs.has_successful_job(operation).await? {
                debug!(operation = %operation, "Prerequisite sync not finished");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Readiness for ReadinessGate {
    async fn ready(&self) -> bool {
        if self.is_open() {
            return true;
        }

        if !self.store.is_reachable().await {
            info!("Store not reachable yet");
            return false;
        }

        match self.prerequisites_done().await {
            Ok(true) => {}
            Ok(false) => {
                info!("Waiting for upstream syncs to finish");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Could not check upstream syncs");
                return false;
            }
        }

        if self
            .bulk_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Initial dispatch in progress");
            return false;
        }
        // Another caller may have finished the bulk run between our first
        // check and winning the flag.
        if self.is_open() {
            self.bulk_in_flight.store(false, Ordering::SeqCst);
            return true;
        }

        match self.bulk.run().await {
            Ok(job) => info!(job = %job.uri, "Initial dispatch complete"),
            Err(err) => {
                error!(error = %err, "Initial dispatch failed, continuing with live dispatch");
                self.alerts
                    .send_alert(
                        Alert::new("Initial dispatch failed").with_detail(format!("{err:#}")),
                    )
                    .await;
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        self.bulk_in_flight.store(false, Ordering::SeqCst);
        info!("Dispatch queues are open");
        true
    }
}
