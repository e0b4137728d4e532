//! The rendering capability consumed by the engine.
//!
//! A [`RenderProvider`] hands out one disposable [`RenderContext`] per
//! task. Every context operation is fire-and-forget from the engine's
//! point of view; results come back asynchronously as
//! [`ContextEvent`]s through the [`EventSink`] the context was created
//! with.

use std::fmt;

use renderq_core::{Completion, Headers, LifecycleEvent, ResponseDetails};
use tokio::sync::mpsc;

/// Identity of one rendering context, unique for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Something a rendering context observed or produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// Navigation of the main frame began.
    LoadStarted,
    /// A watched page lifecycle event fired.
    Lifecycle(LifecycleEvent),
    /// The main document request was redirected.
    Redirect { from: String, to: String },
    /// Response details for a document request arrived.
    Response(ResponseDetails),
    /// Page code signalled completion.
    Completion(Completion),
    /// Navigation failed, page code threw, or the context broke.
    Failed(String),
}

/// Channel half a context uses to report events back to the engine.
///
/// Every event is tagged with the context's id so the engine can
/// correlate it to the owning task.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: ContextId,
    tx: mpsc::UnboundedSender<(ContextId, ContextEvent)>,
}

impl EventSink {
    pub fn new(id: ContextId, tx: mpsc::UnboundedSender<(ContextId, ContextEvent)>) -> Self {
        Self { id, tx }
    }

    pub fn context_id(&self) -> ContextId {
        self.id
    }

    /// Report an event. Returns `false` once the engine has stopped.
    pub fn emit(&self, event: ContextEvent) -> bool {
        self.tx.send((self.id, event)).is_ok()
    }
}

/// An isolated, disposable page-rendering context.
///
/// Implementations must not block: each call queues work and returns.
/// [`dispose`](Self::dispose) consumes the context, so it can only ever
/// run once, and must tear down everything that could still emit
/// events for it.
pub trait RenderContext: Send {
    /// Start loading `url`, sending `headers` with the request.
    fn navigate(&mut self, url: &str, headers: &Headers);

    /// Start reporting `event` as [`ContextEvent::Lifecycle`].
    fn watch(&mut self, event: LifecycleEvent);

    /// Evaluate `script` inside the page. No return value is expected.
    fn run_injection(&mut self, script: &str);

    /// Run the completion step inside the page: evaluate `fetch_code`
    /// (or the default extraction) and signal completion with its value.
    fn run_completion(&mut self, fetch_code: Option<&str>);

    /// Release the context and every listener attached to it.
    fn dispose(self: Box<Self>);
}

/// Factory for rendering contexts.
pub trait RenderProvider: Send + Sync {
    /// Create a fresh context that reports through `sink`.
    fn create(&self, sink: EventSink) -> Result<Box<dyn RenderContext>, RenderError>;
}

/// Errors raised by a [`RenderProvider`].
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to create rendering context: {0}")]
    Create(String),
}
