//! SPARQL adapter: the production `StoreGateway`, `JobStore` and
//! `AlertSink`.

pub mod alerts;
pub mod client;
pub mod error;
pub mod escape;
pub mod gateway;
pub mod jobs;
pub mod queries;

pub use alerts::SparqlAlertSink;
pub use client::SparqlClient;
pub use error::{Result, SparqlError};
pub use gateway::SparqlGateway;
pub use jobs::SparqlJobStore;
