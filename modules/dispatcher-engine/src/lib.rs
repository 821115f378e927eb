//! Dispatch decision-and-scheduling engine.
//!
//! Subjects enter through `DispatchEngine::schedule_subject`. Work runs on
//! `TaskQueue`s: single-consumer, deduplicated by key, drained in FIFO order
//! once their `Readiness` gate opens. The production gate runs the one-time
//! `BulkDispatchJob` before letting live dispatch through.
//!
//! The store, the job audit trail and the alert channel are collaborators
//! behind traits; `memory` provides in-memory versions for tests.

pub mod bulk;
pub mod engine;
pub mod gate;
pub mod memory;
pub mod queue;
pub mod traits;

pub use bulk::BulkDispatchJob;
pub use engine::{DispatchEngine, DispatchQueues, EngineConfig};
pub use gate::ReadinessGate;
pub use memory::{MemoryAlertSink, MemoryJobStore, MemoryStore};
pub use queue::{FailureHandler, JobAction, QueueConfig, QueueStatus, TaskQueue};
pub use traits::{AlertSink, AlwaysReady, JobStore, Readiness, StoreGateway};
