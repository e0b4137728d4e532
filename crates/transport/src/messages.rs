//! Wire shapes shared by the transports.
//!
//! The socket server speaks `{"type": "<kind>", "content": ...}` frames.
//! The queue transport carries bare JSON documents with no envelope.

use renderq_core::{ClientId, FailureNotice, JobPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MSG_TYPE_INIT: &str = "init";
pub const MSG_TYPE_TASK: &str = "task";
pub const MSG_TYPE_TIMEOUT: &str = "timeout";
pub const MSG_TYPE_ERROR: &str = "error";

/// A frame received from the socket server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Identity assignment. `None` when the server sent an empty init.
    Init(Option<ClientId>),
    /// A bare number or string frame, taken as an identity.
    Identity(ClientId),
    /// A job, still undecoded so a broken one can be reported.
    Task(Value),
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Value,
}

/// Parse one socket text frame.
///
/// Returns `Err` only for text that is not JSON or not shaped like a
/// frame at all; unknown `type` values come back as
/// [`ServerMessage::Unknown`].
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    if value.is_number() || value.is_string() {
        return Ok(ServerMessage::Identity(serde_json::from_value(value)?));
    }

    let envelope: RawEnvelope = serde_json::from_value(value)?;
    Ok(match envelope.kind.as_str() {
        MSG_TYPE_INIT => ServerMessage::Init(match envelope.content {
            Value::Null => None,
            content => Some(serde_json::from_value(content)?),
        }),
        MSG_TYPE_TASK => ServerMessage::Task(envelope.content),
        _ => ServerMessage::Unknown(envelope.kind),
    })
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    content: &'a T,
}

/// Encode a socket frame carrying `content`.
pub fn encode_frame<T: Serialize>(kind: &str, content: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope { kind, content })
}

/// Body of a queue reply: the bare JSON document, UTF-8, no envelope.
pub fn queue_body<T: Serialize>(content: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(content)
}

/// The frame that opens a socket session.
pub fn init_frame() -> String {
    format!(r#"{{"type":"{MSG_TYPE_INIT}"}}"#)
}

/// Notice for a job the engine refused.
///
/// Carries whatever the payload still had; both fields are `None` when
/// it could not be decoded at all.
pub fn rejection_notice(
    payload: Option<&JobPayload>,
    client_id: Option<ClientId>,
    error: String,
) -> FailureNotice {
    FailureNotice {
        task_id: payload.and_then(|p| p.task_id.clone()),
        url: payload.and_then(|p| p.url.clone()),
        client_id,
        error,
    }
}

/// Read an identity out of a registration reply body.
///
/// JSON numbers and strings keep their type; anything else that is
/// valid UTF-8 is taken as a text token.
pub fn parse_identity(body: &[u8]) -> Option<ClientId> {
    if let Ok(id) = serde_json::from_slice::<ClientId>(body) {
        return Some(id);
    }
    let text = std::str::from_utf8(body).ok()?.trim();
    (!text.is_empty()).then(|| ClientId::from(text))
}
