//! NATS queue-group transport.
//!
//! Every worker subscribes to the same job subject under one queue
//! group, so the broker hands each job to exactly one of them. Results
//! are published as bare JSON to the reply subject the job arrived with.
//! Timeouts are left to the requester; failures are published to the
//! reply subject so it does not have to wait for its own deadline.
//!
//! Losing the broker ends [`serve`](JobSource::serve) with an error
//! instead of waiting on the client's reconnect loop.

use std::sync::Arc;

use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use futures::StreamExt;
use renderq_core::{ClientId, FailureNotice, JobPayload, RenderResult};
use renderq_engine::{DeliveryError, EngineHandle, ReplyTarget, ResultSink};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::TransportError;
use crate::messages;
use crate::{submit_job, JobSource};

/// Where to connect and what to listen on.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub url: String,
    pub subject: String,
    pub queue_group: String,
    /// Ask the broker for an identity before serving.
    pub register_subject: Option<String>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            subject: "job".into(),
            queue_group: "job.workers".into(),
            register_subject: None,
        }
    }
}

pub struct QueueTransport {
    client: async_nats::Client,
    options: QueueOptions,
    identity: watch::Sender<Option<ClientId>>,
    /// Client connection events; taken by the one serve loop.
    events: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl QueueTransport {
    /// Connect to the broker. Fails if it is unreachable.
    pub async fn connect(options: QueueOptions) -> Result<Arc<Self>, TransportError> {
        tracing::info!(url = %options.url, "Connecting to NATS");
        let (events_tx, events) = mpsc::unbounded_channel();
        let client = forward_events(ConnectOptions::new(), events_tx)
            .connect(options.url.as_str())
            .await
            .map_err(|e| TransportError::Connect {
                url: options.url.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(url = %options.url, "NATS connection established");

        Ok(Self::from_client(client, options, events))
    }

    fn from_client(
        client: async_nats::Client,
        options: QueueOptions,
        events: mpsc::UnboundedReceiver<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            options,
            identity: watch::Sender::new(None),
            events: Mutex::new(Some(events)),
        })
    }

    /// Request an identity on `subject` and keep it for later results.
    pub async fn register(&self, subject: &str) -> Result<ClientId, TransportError> {
        let reply = self
            .client
            .request(subject.to_string(), Default::default())
            .await
            .map_err(|e| TransportError::Register(e.to_string()))?;

        let id = messages::parse_identity(&reply.payload)
            .ok_or_else(|| TransportError::Register("empty registration reply".into()))?;
        tracing::info!(client_id = %id, subject, "Registered with NATS");
        self.identity.send_replace(Some(id.clone()));
        Ok(id)
    }

    async fn publish<T: Serialize>(
        &self,
        reply: &ReplyTarget,
        body: &T,
    ) -> Result<(), DeliveryError> {
        let bytes = messages::queue_body(body)?;
        self.client
            .publish(reply.as_str().to_string(), bytes.into())
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

#[async_trait]
impl JobSource for QueueTransport {
    async fn serve(self: Arc<Self>, engine: EngineHandle) -> Result<(), TransportError> {
        let mut events = self
            .events
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyServing)?;

        if let Some(subject) = &self.options.register_subject {
            self.register(subject).await?;
        }

        let mut jobs = self
            .client
            .queue_subscribe(
                self.options.subject.clone(),
                self.options.queue_group.clone(),
            )
            .await
            .map_err(|e| TransportError::Subscribe {
                subject: self.options.subject.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            subject = %self.options.subject,
            queue_group = %self.options.queue_group,
            "Listening for jobs",
        );

        loop {
            let message = tokio::select! {
                message = jobs.next() => match message {
                    Some(message) => message,
                    None => break,
                },
                Some(event) = events.recv() => {
                    if connection_lost(&event) {
                        tracing::error!(%event, "NATS connection lost");
                        return Err(TransportError::Disconnected(event.to_string()));
                    }
                    tracing::debug!(%event, "NATS connection event");
                    continue;
                }
            };

            let reply = message
                .reply
                .as_ref()
                .map(|subject| ReplyTarget::new(subject.as_str()));
            let origin: Arc<dyn ResultSink> = self.clone();
            let decoded = JobPayload::from_slice(&message.payload);

            if let Some(notice) = submit_job(&engine, origin, decoded, reply.clone())? {
                match &reply {
                    Some(reply) => {
                        if let Err(e) = self.publish(reply, &notice).await {
                            tracing::error!(error = %e, "Failed to report rejected job");
                        }
                    }
                    None => tracing::debug!("Rejected job had no reply subject"),
                }
            }
        }

        tracing::info!("NATS subscription closed");
        Ok(())
    }
}

/// Route client connection events to `events`.
fn forward_events(options: ConnectOptions, events: mpsc::UnboundedSender<Event>) -> ConnectOptions {
    options.event_callback(move |event| {
        let events = events.clone();
        async move {
            let _ = events.send(event);
        }
    })
}

/// Events after which the client would only be reconnecting.
fn connection_lost(event: &Event) -> bool {
    matches!(event, Event::Disconnected | Event::Closed)
}

#[async_trait]
impl ResultSink for QueueTransport {
    fn name(&self) -> &'static str {
        "nats"
    }

    fn identity(&self) -> Option<ClientId> {
        self.identity.borrow().clone()
    }

    async fn deliver_result(
        &self,
        reply: Option<&ReplyTarget>,
        result: &RenderResult,
    ) -> Result<(), DeliveryError> {
        let reply = reply.ok_or(DeliveryError::MissingReplyTarget)?;
        self.publish(reply, result).await
    }

    async fn deliver_failure(
        &self,
        reply: Option<&ReplyTarget>,
        notice: &FailureNotice,
    ) -> Result<(), DeliveryError> {
        match reply {
            Some(reply) => self.publish(reply, notice).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use renderq_core::{TaskId, TimeoutNotice};

    use super::*;

    /// A transport whose client never reaches a broker.
    async fn offline_transport() -> Arc<QueueTransport> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let client = forward_events(ConnectOptions::new().retry_on_initial_connect(), events_tx)
            .connect("nats://127.0.0.1:1")
            .await
            .unwrap();
        QueueTransport::from_client(client, QueueOptions::default(), events)
    }

    #[test]
    fn disconnect_and_close_end_serving() {
        assert!(connection_lost(&Event::Disconnected));
        assert!(connection_lost(&Event::Closed));
        assert!(!connection_lost(&Event::Connected));
        assert!(!connection_lost(&Event::SlowConsumer(1)));
    }

    #[tokio::test]
    async fn timeouts_are_not_sent() {
        let transport = offline_transport().await;
        let notice = TimeoutNotice {
            task_id: TaskId::from("t1"),
            url: "http://x/a".into(),
            client_id: None,
        };
        let reply = ReplyTarget::new("_INBOX.1");
        assert_matches!(transport.deliver_timeout(Some(&reply), &notice).await, Ok(()));
    }

    #[tokio::test]
    async fn results_need_a_reply_subject() {
        let transport = offline_transport().await;
        let result = RenderResult {
            task_id: TaskId::from("t1"),
            original_url: "http://x/a".into(),
            new_url: "http://x/a".into(),
            content: String::new(),
            content_type: None,
            status_code: None,
            request_method: None,
            headers: Default::default(),
            client_id: None,
        };
        assert_matches!(
            transport.deliver_result(None, &result).await,
            Err(DeliveryError::MissingReplyTarget)
        );
        let notice = FailureNotice {
            task_id: None,
            url: None,
            client_id: None,
            error: "bad".into(),
        };
        assert_matches!(transport.deliver_failure(None, &notice).await, Ok(()));
    }

    #[tokio::test]
    async fn a_transport_serves_only_once() {
        let transport = offline_transport().await;
        transport.events.lock().await.take();
        let (engine, _join) = renderq_engine::DispatchEngine::start(Arc::new(NoProvider));
        assert_matches!(
            transport.clone().serve(engine).await,
            Err(TransportError::AlreadyServing)
        );
    }

    struct NoProvider;

    impl renderq_engine::RenderProvider for NoProvider {
        fn create(
            &self,
            _sink: renderq_engine::EventSink,
        ) -> Result<Box<dyn renderq_engine::RenderContext>, renderq_engine::RenderError> {
            Err(renderq_engine::RenderError::Create("unused".into()))
        }
    }

    #[test]
    fn default_options_match_worker_pool_layout() {
        let options = QueueOptions::default();
        assert_eq!(options.subject, "job");
        assert_eq!(options.queue_group, "job.workers");
        assert!(options.register_subject.is_none());
    }
}
