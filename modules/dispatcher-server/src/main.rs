use std::sync::Arc;

use anyhow::{Context, Result};
use dispatcher_common::{load_rules, AppConfig, GraphId};
use dispatcher_engine::{
    AlertSink, BulkDispatchJob, DispatchEngine, DispatchQueues, EngineConfig, JobStore,
    QueueConfig, Readiness, ReadinessGate, StoreGateway, TaskQueue,
};
use dispatcher_server::{build_app, AppState};
use dispatcher_store::{SparqlAlertSink, SparqlClient, SparqlGateway, SparqlJobStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dispatcher=info".parse()?))
        .init();

    let config = AppConfig::from_env()?;
    config.log_summary();

    let rules = Arc::new(
        load_rules(&config.rules_path)
            .with_context(|| format!("Failed to load rules from {}", config.rules_path.display()))?,
    );

    let live = SparqlClient::new(&config.sparql_endpoint, config.sparql_timeout)?;
    let bulk = SparqlClient::new(config.bulk_endpoint(), config.sparql_timeout)?;
    let public_graph = GraphId::new(config.public_graph.clone());

    let store: Arc<dyn StoreGateway> = Arc::new(SparqlGateway::new(
        live.clone(),
        bulk,
        GraphId::new(config.source_graph.clone()),
        public_graph.clone(),
        rules.destinations().clone(),
    ));
    let jobs: Arc<dyn JobStore> =
        Arc::new(SparqlJobStore::new(live.clone(), config.jobs_graph.clone()));
    let alerts: Arc<dyn AlertSink> = Arc::new(SparqlAlertSink::new(
        live,
        config.error_graph.clone(),
        config.job_creator.clone(),
    ));

    // All three queues wait behind the same gate, which runs the bulk
    // dispatch once the upstream syncs are done.
    let bulk_job = BulkDispatchJob::new(
        store.clone(),
        jobs.clone(),
        rules.clone(),
        config.job_creator.clone(),
    );
    let gate: Arc<dyn Readiness> = Arc::new(ReadinessGate::new(
        store.clone(),
        jobs,
        alerts.clone(),
        config.prerequisite_operations.clone(),
        bulk_job,
    ));

    let queue_config = QueueConfig {
        idle_interval: config.queue_poll_interval,
        readiness_poll_interval: config.readiness_poll_interval,
    };
    let queue = |name: &str| TaskQueue::new(name, gate.clone(), alerts.clone(), queue_config.clone());
    let queues = DispatchQueues {
        subjects: queue("subject-processing"),
        public: queue("public-dispatch"),
        org: queue("org-dispatch"),
    };

    let engine = DispatchEngine::new(
        rules,
        store,
        alerts,
        queues,
        EngineConfig {
            public_graph,
            max_cascade_depth: config.max_cascade_depth,
        },
    );
    let _workers = engine.start();

    let app = build_app(Arc::new(AppState { engine }));

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Graph dispatcher listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
