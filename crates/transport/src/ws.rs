//! Duplex WebSocket session transport.
//!
//! Opens one connection to the job server, announces itself with an
//! `init` frame and then multiplexes inbound `task` frames with outbound
//! `task` / `timeout` / `error` frames. Outcomes are queued on a channel
//! and written by the session loop, so deliveries never contend for the
//! socket. Pings are answered by tungstenite itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use renderq_core::{ClientId, FailureNotice, JobPayload, RenderResult, TimeoutNotice};
use renderq_engine::{DeliveryError, EngineHandle, ReplyTarget, ResultSink};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::messages::{
    self, ServerMessage, MSG_TYPE_ERROR, MSG_TYPE_TASK, MSG_TYPE_TIMEOUT,
};
use crate::{submit_job, JobSource};

pub struct SocketTransport {
    url: String,
    identity: watch::Sender<Option<ClientId>>,
    outbound: mpsc::UnboundedSender<Message>,
    /// Taken by the one session loop allowed to run.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl SocketTransport {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            url: url.into(),
            identity: watch::Sender::new(None),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    fn queue<T: Serialize>(&self, kind: &str, content: &T) -> Result<(), DeliveryError> {
        let frame = messages::encode_frame(kind, content)?;
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| DeliveryError::Closed)
    }

    fn set_identity(&self, id: Option<ClientId>) {
        match &id {
            Some(id) => tracing::info!(client_id = %id, "Registered with job server"),
            None => tracing::debug!("Client identity cleared"),
        }
        self.identity.send_replace(id);
    }

    /// Handle one text frame. Errors end the session.
    fn handle_text(self: &Arc<Self>, engine: &EngineHandle, text: &str) -> Result<(), TransportError> {
        let message = match messages::parse_server_message(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw = %text, "Malformed frame from job server");
                return Ok(());
            }
        };

        match message {
            ServerMessage::Init(Some(id)) | ServerMessage::Identity(id) => {
                self.set_identity(Some(id));
            }
            ServerMessage::Init(None) => {
                tracing::debug!("Empty init frame from job server");
            }
            ServerMessage::Task(content) => {
                let origin: Arc<dyn ResultSink> = self.clone();
                let decoded = JobPayload::from_value(content);
                if let Some(notice) = submit_job(engine, origin, decoded, None)? {
                    if let Err(e) = self.queue(MSG_TYPE_ERROR, &notice) {
                        tracing::error!(error = %e, "Failed to report rejected job");
                    }
                }
            }
            ServerMessage::Unknown(kind) => {
                tracing::warn!(kind = %kind, "Unexpected message type from job server");
            }
        }
        Ok(())
    }

    async fn run_session(self: &Arc<Self>, engine: &EngineHandle) -> Result<(), TransportError> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyServing)?;

        tracing::info!(url = %self.url, "Connecting to job server");
        let (ws_stream, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        tracing::info!("Job server connection established");

        let (mut sink, mut stream) = ws_stream.split();
        sink.send(Message::Text(messages::init_frame()))
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;

        loop {
            tokio::select! {
                Some(frame) = outbound_rx.recv() => {
                    sink.send(frame)
                        .await
                        .map_err(|e| TransportError::Session(e.to_string()))?;
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(engine, &text)?,
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.handle_text(engine, text)?,
                            Err(_) => tracing::warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Job server closed the connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(TransportError::Session(e.to_string()));
                        }
                        None => {
                            tracing::info!("Job server stream exhausted");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl JobSource for SocketTransport {
    async fn serve(self: Arc<Self>, engine: EngineHandle) -> Result<(), TransportError> {
        let outcome = self.run_session(&engine).await;
        // The identity belonged to the session that just ended.
        self.set_identity(None);
        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Job server session failed");
        }
        outcome
    }
}

#[async_trait]
impl ResultSink for SocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn identity(&self) -> Option<ClientId> {
        self.identity.borrow().clone()
    }

    async fn deliver_result(
        &self,
        _reply: Option<&ReplyTarget>,
        result: &RenderResult,
    ) -> Result<(), DeliveryError> {
        self.queue(MSG_TYPE_TASK, result)
    }

    async fn deliver_timeout(
        &self,
        _reply: Option<&ReplyTarget>,
        notice: &TimeoutNotice,
    ) -> Result<(), DeliveryError> {
        self.queue(MSG_TYPE_TIMEOUT, notice)
    }

    async fn deliver_failure(
        &self,
        _reply: Option<&ReplyTarget>,
        notice: &FailureNotice,
    ) -> Result<(), DeliveryError> {
        self.queue(MSG_TYPE_ERROR, notice)
    }
}
