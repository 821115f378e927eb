use dispatcher_common::DispatchError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SparqlError>;

#[derive(Debug, Error)]
pub enum SparqlError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("SPARQL error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SparqlError {
    fn from(err: reqwest::Error) -> Self {
        SparqlError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SparqlError {
    fn from(err: serde_json::Error) -> Self {
        SparqlError::Parse(err.to_string())
    }
}

/// A 400 means the store rejected the query text, which for rule-driven
/// queries is a bad filter or path. Everything else is the store being
/// unavailable.
impl From<SparqlError> for DispatchError {
    fn from(err: SparqlError) -> Self {
        match err {
            SparqlError::Network(msg) => DispatchError::StoreUnavailable(msg),
            SparqlError::Api { status: 400, message } => DispatchError::RuleEvaluation(message),
            err @ SparqlError::Api { .. } => DispatchError::StoreUnavailable(err.to_string()),
            SparqlError::Parse(msg) => DispatchError::Parse(msg),
        }
    }
}
