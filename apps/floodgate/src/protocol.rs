//! Control-channel codec: flat JSON field maps in both directions.
//!
//! Inbound messages decode into a [`CommandEnvelope`]; only the envelope
//! shape and the `command` field are required here. Field presence for a
//! given command is the gateway's business, because a missing `streamId`
//! gets a client-visible error while a malformed payload is dropped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound control commands understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Publish,
    TakeConfiguration,
    TakeCandidate,
    Stop,
    Ping,
}

/// A decoded control message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command: Command,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default, rename = "type")]
    pub sdp_type: Option<String>,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub candidate_id: Option<String>,
    #[serde(default)]
    pub candidate_sdp: Option<String>,
    #[serde(default)]
    pub candidate_label: Option<u32>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload was not well-formed JSON.
    #[error("malformed payload: {0}")]
    Malformed(serde_json::Error),
    /// Payload parsed but carries no usable `command` field.
    #[error("message does not contain a command")]
    MissingCommand,
    /// `command` named an operation this server does not understand, or a
    /// field had the wrong shape.
    #[error("unsupported envelope: {0}")]
    Envelope(serde_json::Error),
}

/// Decodes one inbound control message. Never panics; a failure here means
/// the message is logged and dropped without touching session state.
pub fn decode(raw: &str) -> Result<CommandEnvelope, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(DecodeError::Malformed)?;
    match value.get("command") {
        Some(serde_json::Value::String(_)) => {}
        _ => return Err(DecodeError::MissingCommand),
    }
    serde_json::from_value(value).map_err(DecodeError::Envelope)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    PublishStarted,
    PublishFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NoStreamIdSpecified,
    InvalidStreamName,
    NotSetRemoteDescription,
    NotSetLocalDescription,
}

/// Messages sent from the gateway to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Notification {
        definition: NotificationKind,
        stream_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_name: Option<String>,
    },
    Pong,
    #[serde(rename_all = "camelCase")]
    Error {
        definition: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },
    /// Echo of a negotiated local description.
    #[serde(rename_all = "camelCase")]
    TakeConfiguration {
        sdp: String,
        #[serde(rename = "type")]
        sdp_type: String,
        stream_id: String,
    },
    /// Echo of a locally gathered connectivity candidate.
    #[serde(rename_all = "camelCase")]
    TakeCandidate {
        candidate_label: u32,
        candidate_id: String,
        candidate_sdp: String,
        stream_id: String,
    },
    /// Tells the publisher the session is ready for negotiation.
    #[serde(rename_all = "camelCase")]
    Start { stream_id: String },
}

/// Pure serialization of producer-controlled values; no failure path.
pub fn encode(message: &ServerMessage) -> String {
    serde_json::to_string(message).unwrap_or_else(|_| "{}".into())
}
