#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use renderq_core::{
    ClientId, Completion, FailureNotice, Headers, JobPayload, LifecycleEvent, RenderResult,
    TaskId, TimeoutNotice,
};
use renderq_engine::{
    ContextEvent, DeliveryError, DispatchEngine, EngineHandle, EventSink, RenderContext,
    RenderError, RenderProvider, ReplyTarget, ResultSink, SubmitError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One operation the engine performed on a fake context.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String, Headers),
    Watch(LifecycleEvent),
    Injection(String),
    Completion(Option<String>),
}

// ---------------------------------------------------------------------------
// Fake rendering contexts
// ---------------------------------------------------------------------------

struct FakeContext {
    calls: Arc<Mutex<Vec<Call>>>,
    disposed: Arc<AtomicUsize>,
}

impl RenderContext for FakeContext {
    fn navigate(&mut self, url: &str, headers: &Headers) {
        self.record(Call::Navigate(url.to_string(), headers.clone()));
    }

    fn watch(&mut self, event: LifecycleEvent) {
        self.record(Call::Watch(event));
    }

    fn run_injection(&mut self, script: &str) {
        self.record(Call::Injection(script.to_string()));
    }

    fn run_completion(&mut self, fetch_code: Option<&str>) {
        self.record(Call::Completion(fetch_code.map(str::to_string)));
    }

    fn dispose(self: Box<Self>) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeContext {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Test-side view of a context the engine created.
pub struct FakeHandle {
    pub sink: EventSink,
    calls: Arc<Mutex<Vec<Call>>>,
    disposed: Arc<AtomicUsize>,
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: ContextEvent) {
        self.sink.emit(event);
    }

    pub fn lifecycle(&self, event: LifecycleEvent) {
        self.emit(ContextEvent::Lifecycle(event));
    }

    pub fn complete(&self, new_url: &str, content: &str, content_type: Option<&str>) {
        self.emit(ContextEvent::Completion(Completion {
            new_url: new_url.to_string(),
            content: content.to_string(),
            content_type: content_type.map(str::to_string),
        }));
    }
}

/// Provider that hands every created context's handle to the test.
pub struct FakeProvider {
    created: mpsc::UnboundedSender<FakeHandle>,
    fail: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeHandle>) {
        let (created, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            created,
            fail: AtomicBool::new(false),
        });
        (provider, rx)
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl RenderProvider for FakeProvider {
    fn create(&self, sink: EventSink) -> Result<Box<dyn RenderContext>, RenderError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RenderError::Create("browser unavailable".into()));
        }
        let calls = Arc::new(Mutex::new(Vec::new()));
        let disposed = Arc::new(AtomicUsize::new(0));
        let _ = self.created.send(FakeHandle {
            sink,
            calls: Arc::clone(&calls),
            disposed: Arc::clone(&disposed),
        });
        Ok(Box::new(FakeContext { calls, disposed }))
    }
}

// ---------------------------------------------------------------------------
// Recording transports
// ---------------------------------------------------------------------------

/// Everything a [`RecordingSink`] was asked to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    Result(Option<ReplyTarget>, RenderResult),
    Timeout(Option<ReplyTarget>, TimeoutNotice),
    Failure(Option<ReplyTarget>, FailureNotice),
}

pub struct RecordingSink {
    identity: Option<ClientId>,
    tx: mpsc::UnboundedSender<Delivered>,
}

impl RecordingSink {
    pub fn new(identity: Option<ClientId>) -> (Arc<Self>, mpsc::UnboundedReceiver<Delivered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { identity, tx }), rx)
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn identity(&self) -> Option<ClientId> {
        self.identity.clone()
    }

    async fn deliver_result(
        &self,
        reply: Option<&ReplyTarget>,
        result: &RenderResult,
    ) -> Result<(), DeliveryError> {
        self.tx
            .send(Delivered::Result(reply.cloned(), result.clone()))
            .map_err(|_| DeliveryError::Closed)
    }

    async fn deliver_timeout(
        &self,
        reply: Option<&ReplyTarget>,
        notice: &TimeoutNotice,
    ) -> Result<(), DeliveryError> {
        self.tx
            .send(Delivered::Timeout(reply.cloned(), notice.clone()))
            .map_err(|_| DeliveryError::Closed)
    }

    async fn deliver_failure(
        &self,
        reply: Option<&ReplyTarget>,
        notice: &FailureNotice,
    ) -> Result<(), DeliveryError> {
        self.tx
            .send(Delivered::Failure(reply.cloned(), notice.clone()))
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Transport that can only carry results; notices use the default no-op.
#[derive(Default)]
pub struct ResultOnlySink {
    pub results: AtomicUsize,
}

#[async_trait]
impl ResultSink for ResultOnlySink {
    fn name(&self) -> &'static str {
        "result-only"
    }

    fn identity(&self) -> Option<ClientId> {
        None
    }

    async fn deliver_result(
        &self,
        _reply: Option<&ReplyTarget>,
        _result: &RenderResult,
    ) -> Result<(), DeliveryError> {
        self.results.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: EngineHandle,
    pub join: JoinHandle<()>,
    pub provider: Arc<FakeProvider>,
    pub contexts: mpsc::UnboundedReceiver<FakeHandle>,
    pub sink: Arc<RecordingSink>,
    pub delivered: mpsc::UnboundedReceiver<Delivered>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_identity(None)
    }

    pub fn with_identity(identity: Option<ClientId>) -> Self {
        let (provider, contexts) = FakeProvider::new();
        let (sink, delivered) = RecordingSink::new(identity);
        let (engine, join) = DispatchEngine::start(provider.clone());
        Self {
            engine,
            join,
            provider,
            contexts,
            sink,
            delivered,
        }
    }

    pub fn submit(&self, json: &str) -> Result<TaskId, SubmitError> {
        self.submit_with_reply(json, None)
    }

    pub fn submit_with_reply(
        &self,
        json: &str,
        reply: Option<ReplyTarget>,
    ) -> Result<TaskId, SubmitError> {
        let payload = JobPayload::from_slice(json.as_bytes()).expect("test payload must parse");
        self.engine.submit(payload, self.sink.clone(), reply)
    }

    /// Submit a job and wait for the engine to create its context.
    pub async fn admit(&mut self, json: &str) -> FakeHandle {
        self.submit(json).expect("job must be accepted");
        let handle = self.contexts.recv().await.expect("context must be created");
        settle().await;
        handle
    }

    /// Assert nothing has been delivered so far.
    pub fn assert_quiet(&mut self) {
        if let Ok(delivered) = self.delivered.try_recv() {
            panic!("unexpected delivery: {delivered:?}");
        }
    }
}

/// Let the engine and any spawned deliveries run to quiescence without
/// letting the paused clock auto-advance.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
