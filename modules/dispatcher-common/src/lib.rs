pub mod config;
pub mod delta;
pub mod error;
pub mod rules;
pub mod types;
pub mod vocab;

pub use config::AppConfig;
pub use delta::{subjects_to_process, ChangeSet, Term, Triple};
pub use error::{DispatchError, DispatchResult};
pub use rules::{load_rules, DestinationRule, RuleEntry, RuleTable};
pub use types::*;
