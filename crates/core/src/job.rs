//! Inbound render jobs.
//!
//! A job arrives as a [`JobPayload`] (the JSON shape both transports
//! carry) and is validated into a [`Job`] with every default applied.
//! Validation happens once, before the engine allocates anything for
//! the job, so a rejected payload never leaves partial state behind.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::JobError;
use crate::types::{Headers, TaskId};

/// Wall-clock budget for a job that does not specify one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Longest budget a job may ask for. Anything above is rejected.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Selects what ends the waiting phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Run the job's injection inside the page; the injected code
    /// signals completion on its own.
    Inject,
    /// Wait for a page lifecycle event, then run the fetch code.
    #[default]
    MainWait,
}

impl FromStr for Mode {
    type Err = JobError;

    /// Case-insensitive; an empty string selects the default.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INJECT" => Ok(Self::Inject),
            "MAIN_WAIT" | "" => Ok(Self::MainWait),
            _ => Err(JobError::UnknownMode(s.to_string())),
        }
    }
}

/// Page lifecycle events a job may name as its "ready" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleEvent {
    /// The page and all its subresources finished loading.
    #[default]
    LoadFinished,
    /// The document was parsed and the DOM is ready.
    DomReady,
    /// The main frame stopped loading (including aborted loads).
    StopLoading,
}

impl LifecycleEvent {
    /// Wire name used in the job's `event` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadFinished => "did-finish-load",
            Self::DomReady => "dom-ready",
            Self::StopLoading => "did-stop-loading",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "did-finish-load" | "" => Ok(Self::LoadFinished),
            "dom-ready" => Ok(Self::DomReady),
            "did-stop-loading" => Ok(Self::StopLoading),
            other => Err(JobError::UnknownEvent(other.to_string())),
        }
    }
}

/// A job exactly as carried on the wire.
///
/// Every field is optional here; [`Job::try_from`] applies defaults and
/// rejects payloads that cannot be run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    #[serde(rename = "taskID", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_code: Option<String>,
    /// Milliseconds, any JSON number; zero or negative means "use the
    /// default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl JobPayload {
    /// Parse a payload from raw message bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, JobError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse a payload from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, JobError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A validated job with all defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: TaskId,
    pub url: String,
    pub mode: Mode,
    pub event: LifecycleEvent,
    pub injection: Option<String>,
    pub fetch_code: Option<String>,
    pub timeout: Duration,
    /// Extra request headers for the navigation.
    pub headers: Headers,
}

impl Job {
    /// The injection to dispatch, if this job runs in inject mode.
    ///
    /// `INJECT` without an injection script behaves exactly like
    /// `MAIN_WAIT`, so this returns `None` in that case too.
    pub fn injection_script(&self) -> Option<&str> {
        match self.mode {
            Mode::Inject => self.injection.as_deref(),
            Mode::MainWait => None,
        }
    }
}

impl TryFrom<JobPayload> for Job {
    type Error = JobError;

    fn try_from(payload: JobPayload) -> Result<Self, Self::Error> {
        let id = payload.task_id.ok_or(JobError::MissingTaskId)?;
        let url = non_empty(payload.url).ok_or(JobError::MissingUrl)?;
        let mode = payload.mode.as_deref().unwrap_or_default().parse()?;
        let event = payload.event.as_deref().unwrap_or_default().parse()?;
        let timeout = timeout_from(payload.timeout.as_ref())?;

        Ok(Self {
            id,
            url,
            mode,
            event,
            injection: non_empty(payload.injection),
            fetch_code: non_empty(payload.fetch_code),
            timeout,
            headers: payload.headers.unwrap_or_default(),
        })
    }
}

/// Fractional milliseconds round up.
fn timeout_from(requested: Option<&Number>) -> Result<Duration, JobError> {
    let Some(ms) = requested.and_then(Number::as_f64).filter(|ms| *ms > 0.0) else {
        return Ok(DEFAULT_TIMEOUT);
    };
    if ms > MAX_TIMEOUT.as_millis() as f64 {
        return Err(JobError::TimeoutTooLong {
            requested: requested.map(Number::to_string).unwrap_or_default(),
            max: MAX_TIMEOUT,
        });
    }
    Ok(Duration::from_millis(ms.ceil() as u64))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
