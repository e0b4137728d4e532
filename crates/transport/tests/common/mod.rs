#![allow(dead_code)]

use std::sync::Arc;

use renderq_core::{Headers, LifecycleEvent};
use renderq_engine::{EventSink, RenderContext, RenderError, RenderProvider};
use tokio::sync::mpsc;

/// Context that does nothing; the test drives it through its sink.
struct InertContext;

impl RenderContext for InertContext {
    fn navigate(&mut self, _url: &str, _headers: &Headers) {}
    fn watch(&mut self, _event: LifecycleEvent) {}
    fn run_injection(&mut self, _script: &str) {}
    fn run_completion(&mut self, _fetch_code: Option<&str>) {}
    fn dispose(self: Box<Self>) {}
}

/// Provider that hands each new context's event sink to the test.
pub struct SinkProvider {
    created: mpsc::UnboundedSender<EventSink>,
}

impl SinkProvider {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EventSink>) {
        let (created, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { created }), rx)
    }
}

impl RenderProvider for SinkProvider {
    fn create(&self, sink: EventSink) -> Result<Box<dyn RenderContext>, RenderError> {
        let _ = self.created.send(sink);
        Ok(Box::new(InertContext))
    }
}
