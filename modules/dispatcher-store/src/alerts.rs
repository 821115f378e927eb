use async_trait::async_trait;
use chrono::Utc;
use dispatcher_common::{vocab, Alert};
use dispatcher_engine::AlertSink;
use tracing::warn;
use uuid::Uuid;

use crate::client::SparqlClient;
use crate::queries;

/// Writes alerts as `oslc:Error` resources into the error graph.
pub struct SparqlAlertSink {
    client: SparqlClient,
    error_graph: String,
    creator: String,
}

impl SparqlAlertSink {
    pub fn new(client: SparqlClient, error_graph: impl Into<String>, creator: impl Into<String>) -> Self {
        Self {
            client,
            error_graph: error_graph.into(),
            creator: creator.into(),
        }
    }
}

#[async_trait]
impl AlertSink for SparqlAlertSink {
    async fn send_alert(&self, alert: Alert) {
        let id = Uuid::new_v4().to_string();
        let uri = format!("{}{id}", vocab::ALERT_URI_PREFIX);
        let update = queries::insert_alert(
            &self.error_graph,
            &uri,
            &id,
            &self.creator,
            &alert,
            &Utc::now(),
        );

        if let Err(e) = self.client.update(&update).await {
            warn!(
                error = %e,
                message = %alert.message,
                "Failed to store alert in the error graph"
            );
        }
    }
}
