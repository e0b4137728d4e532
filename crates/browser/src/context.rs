//! One render page and the task that drives it.
//!
//! [`CdpContext`] is the engine-facing half: every trait call becomes a
//! [`ContextCommand`] on a channel. The page itself is owned by a
//! spawned actor that applies those commands in order and translates
//! DevTools events into [`ContextEvent`]s. Disposal cancels the actor,
//! which closes the page and drops every event subscription with it.

use std::sync::Arc;

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived,
    Headers as CdpHeaders, ResourceType, Response, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventDomContentEventFired, EventFrameStartedLoading,
    EventFrameStoppedLoading, EventLoadEventFired, FrameId, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::page::Page;
use futures::StreamExt;
use renderq_core::{Headers, LifecycleEvent};
use renderq_engine::{ContextEvent, EventSink, RenderContext};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::observe::{self, DocumentRequests, ObservedResponse};

/// Work queued for a page actor.
#[derive(Debug)]
enum ContextCommand {
    Navigate { url: String, headers: Headers },
    Watch(LifecycleEvent),
    RunInjection(String),
    RunCompletion(Option<String>),
}

/// Engine-facing handle of a render page.
pub struct CdpContext {
    commands: mpsc::UnboundedSender<ContextCommand>,
    cancel: CancellationToken,
}

impl CdpContext {
    /// Open a page on `browser` and start its actor.
    pub(crate) fn spawn(browser: Arc<Browser>, sink: EventSink) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor_cancel = cancel.clone();
        tokio::spawn(async move {
            let context = sink.context_id();
            if let Err(e) = run_page(&browser, &sink, rx, &actor_cancel).await {
                tracing::warn!(%context, error = %e, "Render page failed");
                sink.emit(ContextEvent::Failed(e.to_string()));
            }
            tracing::debug!(%context, "Render page closed");
        });

        Self { commands, cancel }
    }

    fn send(&self, command: ContextCommand) {
        // A closed channel means the actor already failed and reported it.
        let _ = self.commands.send(command);
    }
}

impl RenderContext for CdpContext {
    fn navigate(&mut self, url: &str, headers: &Headers) {
        self.send(ContextCommand::Navigate {
            url: url.to_string(),
            headers: headers.clone(),
        });
    }

    fn watch(&mut self, event: LifecycleEvent) {
        self.send(ContextCommand::Watch(event));
    }

    fn run_injection(&mut self, script: &str) {
        self.send(ContextCommand::RunInjection(script.to_string()));
    }

    fn run_completion(&mut self, fetch_code: Option<&str>) {
        self.send(ContextCommand::RunCompletion(fetch_code.map(str::to_string)));
    }

    fn dispose(self: Box<Self>) {
        self.cancel.cancel();
    }
}

impl Drop for CdpContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Per-page state the actor keeps between events.
struct PageState {
    main_frame: Option<FrameId>,
    watched: Option<LifecycleEvent>,
    /// Lifecycle events from the initial blank document are not reported.
    navigated: bool,
    requests: DocumentRequests,
}

impl PageState {
    fn is_main_frame(&self, frame: Option<&FrameId>) -> bool {
        match (&self.main_frame, frame) {
            (Some(main), Some(frame)) => main == frame,
            // Without a known main frame every document counts.
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    fn lifecycle(&self, event: LifecycleEvent) -> Option<ContextEvent> {
        (self.navigated && self.watched == Some(event)).then_some(ContextEvent::Lifecycle(event))
    }
}

async fn run_page(
    browser: &Browser,
    sink: &EventSink,
    mut commands: mpsc::UnboundedReceiver<ContextCommand>,
    cancel: &CancellationToken,
) -> Result<(), chromiumoxide::error::CdpError> {
    let page = browser.new_page("about:blank").await?;
    let binding = format!("__renderq_finish_{}", uuid::Uuid::new_v4().simple());

    page.execute(EnableParams::default()).await?;
    page.execute(AddBindingParams::new(binding.clone())).await?;
    page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
        observe::content_script(&binding),
    ))
    .await?;

    let mut load = page.event_listener::<EventLoadEventFired>().await?;
    let mut dom_ready = page.event_listener::<EventDomContentEventFired>().await?;
    let mut started = page.event_listener::<EventFrameStartedLoading>().await?;
    let mut stopped = page.event_listener::<EventFrameStoppedLoading>().await?;
    let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut failures = page.event_listener::<EventLoadingFailed>().await?;
    let mut bindings = page.event_listener::<EventBindingCalled>().await?;

    let mut state = PageState {
        main_frame: page.mainframe().await?,
        watched: None,
        navigated: false,
        requests: DocumentRequests::default(),
    };

    loop {
        let events = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => {
                apply(&page, &mut state, sink, command).await;
                Vec::new()
            }
            Some(event) = bindings.next() => {
                if event.name == binding {
                    vec![observe::parse_binding_payload(&event.payload)]
                } else {
                    Vec::new()
                }
            }
            Some(event) = requests.next() => {
                if event.r#type == Some(ResourceType::Document)
                    && state.is_main_frame(event.frame_id.as_ref())
                {
                    let request_headers = observe::headers_from_cdp(event.request.headers.inner());
                    state.requests.will_send(
                        event.request_id.inner(),
                        &event.request.url,
                        &event.request.method,
                        &request_headers,
                        event.redirect_response.as_ref().map(observed),
                    )
                } else {
                    Vec::new()
                }
            }
            Some(event) = responses.next() => {
                if event.r#type == ResourceType::Document
                    && state.is_main_frame(event.frame_id.as_ref())
                {
                    state
                        .requests
                        .response(event.request_id.inner(), observed(&event.response))
                        .into_iter()
                        .collect()
                } else {
                    Vec::new()
                }
            }
            Some(event) = failures.next() => {
                state.requests.forget(event.request_id.inner());
                Vec::new()
            }
            Some(event) = started.next() => {
                if state.navigated && state.is_main_frame(Some(&event.frame_id)) {
                    vec![ContextEvent::LoadStarted]
                } else {
                    Vec::new()
                }
            }
            Some(event) = stopped.next() => {
                if state.is_main_frame(Some(&event.frame_id)) {
                    state.lifecycle(LifecycleEvent::StopLoading).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            Some(_) = dom_ready.next() => {
                state.lifecycle(LifecycleEvent::DomReady).into_iter().collect()
            }
            Some(_) = load.next() => {
                state.lifecycle(LifecycleEvent::LoadFinished).into_iter().collect()
            }
        };

        for event in events {
            if !sink.emit(event) {
                return page.close().await;
            }
        }
    }

    page.close().await
}

/// Apply one command. Anything that can block on the page runs in its
/// own task so the actor keeps draining events.
async fn apply(page: &Page, state: &mut PageState, sink: &EventSink, command: ContextCommand) {
    match command {
        ContextCommand::Watch(event) => state.watched = Some(event),
        ContextCommand::RunInjection(script) => {
            // Registered after the content script, so the navigated
            // document runs it right after `__renderq` exists.
            let installed = match observe::injection_call(&script) {
                Ok(call) => page
                    .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(call))
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = installed {
                sink.emit(ContextEvent::Failed(format!("failed to install injection: {e}")));
            }
        }
        ContextCommand::Navigate { url, headers } => {
            state.navigated = true;
            let page = page.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Some(error) = navigate(&page, &url, &headers).await {
                    sink.emit(ContextEvent::Failed(error));
                }
            });
        }
        ContextCommand::RunCompletion(fetch_code) => {
            let expression = match observe::completion_call(fetch_code.as_deref()) {
                Ok(expression) => expression,
                Err(e) => {
                    sink.emit(ContextEvent::Failed(e.to_string()));
                    return;
                }
            };
            let page = page.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                if let Err(e) = page.evaluate(expression).await {
                    sink.emit(ContextEvent::Failed(format!("completion step failed: {e}")));
                }
            });
        }
    }
}

/// Returns the navigation error, if any.
async fn navigate(page: &Page, url: &str, headers: &Headers) -> Option<String> {
    if !headers.is_empty() {
        let params = SetExtraHttpHeadersParams::new(CdpHeaders::new(observe::headers_to_cdp(headers)));
        if let Err(e) = page.execute(params).await {
            return Some(format!("failed to set request headers: {e}"));
        }
    }

    match page.execute(NavigateParams::new(url)).await {
        Ok(response) => response.result.error_text.clone(),
        Err(e) => Some(e.to_string()),
    }
}

fn observed(response: &Response) -> ObservedResponse {
    ObservedResponse {
        url: response.url.clone(),
        status: response.status,
        headers: observe::headers_from_cdp(response.headers.inner()),
        mime_type: response.mime_type.clone(),
    }
}
