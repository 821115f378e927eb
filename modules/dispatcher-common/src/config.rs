use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::vocab;

/// Application configuration loaded from environment variables.
/// The rule table itself lives in the TOML file at `rules_path`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Store
    pub sparql_endpoint: String,
    /// Endpoint for the bulk dispatch, bypassing the authorization layer.
    pub direct_database_endpoint: Option<String>,
    pub sparql_timeout: Duration,

    // Graphs
    pub source_graph: String,
    pub public_graph: String,
    pub jobs_graph: String,
    pub error_graph: String,

    // Jobs
    pub job_creator: String,
    pub prerequisite_operations: Vec<String>,

    // Rules
    pub rules_path: PathBuf,

    // Queues
    pub queue_poll_interval: Duration,
    pub readiness_poll_interval: Duration,
    pub max_cascade_depth: u32,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let prerequisite_operations = match std::env::var("PREREQUISITE_JOB_OPERATIONS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => vocab::DEFAULT_PREREQUISITE_OPERATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Self {
            sparql_endpoint: env_or("SPARQL_ENDPOINT", "http://database:8890/sparql"),
            direct_database_endpoint: std::env::var("DIRECT_DATABASE_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            sparql_timeout: Duration::from_secs(env_parse("SPARQL_TIMEOUT_SECS", 300)?),
            source_graph: env_or("DISPATCH_SOURCE_GRAPH", "http://mu.semte.ch/graphs/ingest"),
            public_graph: env_or("PUBLIC_GRAPH", "http://mu.semte.ch/graphs/public"),
            jobs_graph: env_or("JOBS_GRAPH", "http://mu.semte.ch/graphs/dispatcher-jobs"),
            error_graph: env_or("ERROR_GRAPH", "http://mu.semte.ch/graphs/error"),
            job_creator: env_or("JOB_CREATOR_URI", vocab::DEFAULT_JOB_CREATOR),
            prerequisite_operations,
            rules_path: PathBuf::from(env_or("DISPATCH_RULES_PATH", "config/dispatch-rules.toml")),
            queue_poll_interval: Duration::from_millis(env_parse("QUEUE_POLL_INTERVAL", 100)?),
            readiness_poll_interval: Duration::from_millis(env_parse(
                "INITIAL_SYNC_POLL_INTERVAL",
                10_000,
            )?),
            max_cascade_depth: env_parse("MAX_CASCADE_DEPTH", 8)?,
            web_host: env_or("WEB_HOST", "0.0.0.0"),
            web_port: env_parse("WEB_PORT", 80)?,
        })
    }

    /// Endpoint used by the one-time bulk dispatch.
    pub fn bulk_endpoint(&self) -> &str {
        self.direct_database_endpoint
            .as_deref()
            .unwrap_or(&self.sparql_endpoint)
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  SPARQL_ENDPOINT: {}", self.sparql_endpoint);
        tracing::info!(
            "  DIRECT_DATABASE_ENDPOINT: {}",
            self.direct_database_endpoint.as_deref().unwrap_or("<not set>")
        );
        tracing::info!("  DISPATCH_SOURCE_GRAPH: {}", self.source_graph);
        tracing::info!("  PUBLIC_GRAPH: {}", self.public_graph);
        tracing::info!("  DISPATCH_RULES_PATH: {}", self.rules_path.display());
        tracing::info!(
            "  PREREQUISITE_JOB_OPERATIONS: {} configured",
            self.prerequisite_operations.len()
        );
        tracing::info!("  MAX_CASCADE_DEPTH: {}", self.max_cascade_depth);
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
