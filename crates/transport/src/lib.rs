//! Job intake and result delivery over the network.
//!
//! Two interchangeable adapters feed one [`EngineHandle`]:
//!
//! - [`QueueTransport`] subscribes to a job subject under a NATS queue
//!   group and replies on each message's reply subject.
//! - [`SocketTransport`] keeps one WebSocket session to a job server and
//!   multiplexes jobs, results and notices over it.
//!
//! Both are [`ResultSink`]s for the jobs they submit and [`JobSource`]s
//! for the engine.

pub mod error;
pub mod messages;
pub mod nats;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use renderq_core::{FailureNotice, JobError, JobPayload};
use renderq_engine::{EngineHandle, ReplyTarget, ResultSink, SubmitError};

pub use error::TransportError;
pub use nats::{QueueOptions, QueueTransport};
pub use ws::SocketTransport;

/// The intake half of a transport.
#[async_trait]
pub trait JobSource: ResultSink {
    /// Receive jobs and submit them to `engine` until the connection
    /// ends. A clean close returns `Ok`; anything else is an error the
    /// process should exit on.
    async fn serve(self: Arc<Self>, engine: EngineHandle) -> Result<(), TransportError>;
}

/// Submit a decoded job, turning a refusal into the notice to send back.
///
/// Returns `Ok(None)` once the engine has the job.
pub(crate) fn submit_job(
    engine: &EngineHandle,
    origin: Arc<dyn ResultSink>,
    decoded: Result<JobPayload, JobError>,
    reply: Option<ReplyTarget>,
) -> Result<Option<FailureNotice>, TransportError> {
    let client_id = origin.identity();
    let transport = origin.name();

    let payload = match decoded {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(transport, error = %e, "Discarding undecodable job");
            return Ok(Some(messages::rejection_notice(None, client_id, e.to_string())));
        }
    };

    match engine.submit(payload.clone(), origin, reply) {
        Ok(task_id) => {
            tracing::debug!(transport, %task_id, "Job submitted");
            Ok(None)
        }
        Err(SubmitError::Job(e)) => {
            tracing::warn!(transport, error = %e, "Rejecting invalid job");
            Ok(Some(messages::rejection_notice(
                Some(&payload),
                client_id,
                e.to_string(),
            )))
        }
        Err(SubmitError::EngineStopped) => Err(TransportError::EngineStopped),
    }
}
