//! Fixed IRIs shared by the engine and the store adapter.

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

// Relationship predicates whose removal changes who may see an organization.
pub const ORG_LINKED_TO: &str = "http://www.w3.org/ns/org#linkedTo";
pub const ORG_ORGANIZATION: &str = "http://www.w3.org/ns/org#organization";

pub const INITIAL_DISPATCH_JOB_OPERATION: &str =
    "http://lblod.data.gift/vocabularies/jobs/InitialDispatchJobOperation";
pub const INITIAL_DISPATCH_TASK_OPERATION: &str =
    "http://lblod.data.gift/vocabularies/tasks/InitialDispatchTaskOperation";
pub const DEFAULT_JOB_CREATOR: &str =
    "http://lblod.data.gift/services/worship-positions-graph-dispatcher-service";

pub const JOB_TYPE: &str = "http://vocab.deri.ie/cogs#Job";
pub const TASK_TYPE: &str = "http://redpencil.data.gift/vocabularies/tasks/Task";
pub const ERROR_TYPE: &str = "http://open-services.net/ns/core#Error";
pub const DISPATCH_ERROR_TYPE: &str = "http://redpencil.data.gift/vocabularies/dispatcher/Error";

pub const JOB_URI_PREFIX: &str = "http://redpencil.data.gift/id/jobs/";
pub const TASK_URI_PREFIX: &str = "http://redpencil.data.gift/id/task/";
pub const JOB_ERROR_URI_PREFIX: &str = "http://redpencil.data.gift/id/jobs/error/";
pub const ALERT_URI_PREFIX: &str = "http://data.lblod.info/errors/";

pub const STATUS_SCHEDULED: &str = "http://redpencil.data.gift/id/concept/JobStatus/scheduled";
pub const STATUS_BUSY: &str = "http://redpencil.data.gift/id/concept/JobStatus/busy";
pub const STATUS_SUCCESS: &str = "http://redpencil.data.gift/id/concept/JobStatus/success";
pub const STATUS_FAILED: &str = "http://redpencil.data.gift/id/concept/JobStatus/failed";

/// Upstream delta-consumer syncs that must finish before the bulk dispatch.
pub const DEFAULT_PREREQUISITE_OPERATIONS: [&str; 2] = [
    "http://redpencil.data.gift/id/jobs/concept/JobOperation/deltas/consumer/wsSensitive",
    "http://redpencil.data.gift/id/jobs/concept/JobOperation/deltas/consumer/worshipPosts",
];
