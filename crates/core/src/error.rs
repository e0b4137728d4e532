use std::time::Duration;

/// Reasons a job is rejected before any task is created for it.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Job is missing a url")]
    MissingUrl,

    #[error("Job is missing a taskID")]
    MissingTaskId,

    #[error("Unknown job mode: {0}")]
    UnknownMode(String),

    #[error("Unknown lifecycle event: {0}")]
    UnknownEvent(String),

    #[error("Job timeout of {requested}ms exceeds the maximum of {}ms", max.as_millis())]
    TimeoutTooLong { requested: String, max: Duration },
}
