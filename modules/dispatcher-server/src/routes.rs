use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use dispatcher_common::{subjects_to_process, ChangeSet};
use dispatcher_engine::QueueStatus;
use serde::Serialize;
use tracing::{debug, info};

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ready: bool,
    pub queues: Vec<QueueStatus>,
}

/// Delta notifier callback. Subjects are only scheduled here; dispatch
/// happens on the queues after the response is sent.
pub async fn delta(
    State(state): State<Arc<AppState>>,
    Json(changesets): Json<Vec<ChangeSet>>,
) -> StatusCode {
    let subjects = subjects_to_process(&changesets);
    if subjects.is_empty() {
        debug!(changesets = changesets.len(), "Delta has nothing to dispatch");
        return StatusCode::NO_CONTENT;
    }

    let total = subjects.len();
    let scheduled = subjects
        .into_iter()
        .map(|subject| state.engine.schedule_subject(subject))
        .filter(|added| *added)
        .count();
    info!(subjects = total, scheduled, "Delta received");

    StatusCode::OK
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let queues = state.engine.queues().statuses();
    let ready = queues.iter().all(|q| q.ready);
    Json(StatusResponse { ready, queues })
}
