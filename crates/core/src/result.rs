//! Outbound payloads and the response details they are built from.
//!
//! Field names on the wire are fixed (`taskID`, `originalURL`,
//! `newURL`, ...) because hosts decode them by name.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, Headers, TaskId};

/// One observation of an HTTP response for a document request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetails {
    /// URL the response was served for (after any redirects).
    pub url: String,
    /// URL the request chain started from.
    pub original_url: String,
    pub status_code: u16,
    pub request_method: String,
    pub referrer: Option<String>,
    pub headers: Headers,
    pub content_type: Option<String>,
}

impl ResponseDetails {
    /// Whether this observation describes a GET for `url`.
    pub fn is_get_for(&self, url: &str) -> bool {
        self.request_method.eq_ignore_ascii_case("GET") && self.url == url
    }
}

/// The completion signal sent by code running inside a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(rename = "newURL")]
    pub new_url: String,
    pub content: String,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
}

/// Successful outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    #[serde(rename = "originalURL")]
    pub original_url: String,
    #[serde(rename = "newURL")]
    pub new_url: String,
    pub content: String,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    #[serde(rename = "requestMethod")]
    pub request_method: Option<String>,
    pub headers: Headers,
    #[serde(rename = "clientID")]
    pub client_id: Option<ClientId>,
}

impl RenderResult {
    /// Combine the completion signal with whatever response details
    /// were captured for the final document.
    ///
    /// The signal's content type wins; the captured response's content
    /// type fills in when the page code did not report one.
    pub fn assemble(
        task_id: TaskId,
        original_url: String,
        completion: Completion,
        response: Option<&ResponseDetails>,
        client_id: Option<ClientId>,
    ) -> Self {
        let content_type = completion
            .content_type
            .or_else(|| response.and_then(|r| r.content_type.clone()));

        Self {
            task_id,
            original_url,
            new_url: completion.new_url,
            content: completion.content,
            content_type,
            status_code: response.map(|r| r.status_code),
            request_method: response.map(|r| r.request_method.clone()),
            headers: response.map(|r| r.headers.clone()).unwrap_or_default(),
            client_id,
        }
    }
}

/// Sent when a job's deadline passes before it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutNotice {
    #[serde(rename = "taskID")]
    pub task_id: TaskId,
    pub url: String,
    #[serde(rename = "clientID")]
    pub client_id: Option<ClientId>,
}

/// Sent when a job cannot be run or its rendering context fails.
///
/// `task_id` and `url` are absent when the payload was too broken to
/// read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    #[serde(rename = "taskID")]
    pub task_id: Option<TaskId>,
    pub url: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: Option<ClientId>,
    pub error: String,
}
