//! Minimal SPARQL 1.1 protocol client.
//!
//! Queries and updates are form-posted with the `mu-auth-sudo` header so
//! they bypass the authorization layer's per-user graph rewriting.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SparqlError};

const SUDO_HEADER: &str = "mu-auth-sudo";
const RESULTS_JSON: &str = "application/sparql-results+json";

/// One solution of a SELECT: variable name to bound term.
pub type Binding = HashMap<String, BoundTerm>;

#[derive(Debug, Clone, Deserialize)]
pub struct BoundTerm {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct SelectResponse {
    results: SelectResults,
}

#[derive(Debug, Deserialize)]
struct SelectResults {
    bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    boolean: bool,
}

#[derive(Clone)]
pub struct SparqlClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SparqlClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn select(&self, query: &str) -> Result<Vec<Binding>> {
        let body = self.post("query", query).await?;
        let parsed: SelectResponse = serde_json::from_str(&body)?;
        Ok(parsed.results.bindings)
    }

    pub async fn ask(&self, query: &str) -> Result<bool> {
        let body = self.post("query", query).await?;
        let parsed: AskResponse = serde_json::from_str(&body)?;
        Ok(parsed.boolean)
    }

    pub async fn update(&self, update: &str) -> Result<()> {
        self.post("update", update).await?;
        Ok(())
    }

    async fn post(&self, field: &str, text: &str) -> Result<String> {
        debug!(endpoint = %self.endpoint, kind = field, "SPARQL request");

        let resp = self
            .client
            .post(&self.endpoint)
            .header(SUDO_HEADER, "true")
            .header(ACCEPT, RESULTS_JSON)
            .form(&[(field, text)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SparqlError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}

/// Values bound to `var` across all solutions, in order.
pub fn values(bindings: &[Binding], var: &str) -> Vec<String> {
    bindings
        .iter()
        .filter_map(|b| b.get(var))
        .map(|t| t.value.clone())
        .collect()
}
