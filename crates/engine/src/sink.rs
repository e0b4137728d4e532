//! Delivery half of a transport.

use std::fmt;

use async_trait::async_trait;
use renderq_core::{ClientId, FailureNotice, RenderResult, TimeoutNotice};

/// Transport-specific address an outcome must be routed to.
///
/// Request/reply transports supply one per job; session transports
/// route through their single session and leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyTarget(String);

impl ReplyTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while handing an outcome to a transport.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport is closed")]
    Closed,

    #[error("Reply target required but missing")]
    MissingReplyTarget,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Where the engine sends the outcome of a job.
///
/// Only [`deliver_result`](Self::deliver_result) is mandatory. Timeout
/// and failure notices are best-effort: transports that cannot address
/// the originator out of band keep the default no-op.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Identity this transport is currently registered under.
    fn identity(&self) -> Option<ClientId>;

    async fn deliver_result(
        &self,
        reply: Option<&ReplyTarget>,
        result: &RenderResult,
    ) -> Result<(), DeliveryError>;

    async fn deliver_timeout(
        &self,
        _reply: Option<&ReplyTarget>,
        _notice: &TimeoutNotice,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn deliver_failure(
        &self,
        _reply: Option<&ReplyTarget>,
        _notice: &FailureNotice,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}
