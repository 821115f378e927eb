use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Transport failure or store not answering. Transient.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A configured filter or path expression was rejected by the store.
    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    /// Copy or retract did not complete; partition membership may be partial.
    #[error("Dispatch failure for {subject}: {message}")]
    DispatchFailure { subject: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn dispatch_failure(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatchFailure {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Whether retrying later against the same store state can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
