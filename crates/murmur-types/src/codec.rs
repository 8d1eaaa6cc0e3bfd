//! Message protocol codec.
//!
//! Binary transport messages are audio and pass through untouched. Text
//! messages are JSON control frames discriminated by their `type` field.
//! Decoding never fails on an unknown `type`: such frames become
//! [`ServerEvent::Message`] so older clients survive backend additions.

use crate::events::server::{
    AudioResponseEvent, CloneResponseEvent, ConnectedEvent, ErrorEvent, GenericMessage,
    TranscriptEvent,
};
use crate::events::{ClientCommand, ServerEvent, wire};
use crate::raw::RawMessage;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// A frame received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Synthesized audio for playback.
    Audio(Vec<u8>),
    Control(ServerEvent),
}

/// A frame sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Captured audio. Sent as-is, never wrapped in an envelope.
    Audio(Vec<u8>),
    Command(ClientCommand),
}

impl OutboundFrame {
    pub fn is_audio(&self) -> bool {
        matches!(self, OutboundFrame::Audio(_))
    }
}

impl From<ClientCommand> for OutboundFrame {
    fn from(command: ClientCommand) -> Self {
        OutboundFrame::Command(command)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedFrameError {
    #[error("control frame is not valid JSON: {0}")]
    Json(String),
    #[error("control frame must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("`{frame_type}` frame has an invalid body: {reason}")]
    InvalidBody { frame_type: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("command type must not be empty")]
    EmptyType,
    #[error("failed to serialize command: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds the control frame for `command` carrying every field of `params`.
///
/// A `type` key inside `params` is overwritten by `command`.
pub fn encode_command(
    command: &str,
    params: &Map<String, Value>,
) -> Result<RawMessage, EncodeError> {
    if command.is_empty() {
        return Err(EncodeError::EmptyType);
    }
    let mut body = params.clone();
    body.insert(
        wire::TYPE_FIELD.to_string(),
        Value::String(command.to_string()),
    );
    let text = serde_json::to_string(&Value::Object(body))?;
    Ok(RawMessage::Text(text))
}

pub fn encode(frame: OutboundFrame) -> Result<RawMessage, EncodeError> {
    match frame {
        OutboundFrame::Audio(bytes) => Ok(RawMessage::Binary(bytes)),
        OutboundFrame::Command(command) => {
            let params = command.params()?;
            encode_command(command.command_type(), &params)
        }
    }
}

pub fn decode(message: RawMessage) -> Result<InboundFrame, MalformedFrameError> {
    match message {
        RawMessage::Binary(bytes) => Ok(InboundFrame::Audio(bytes)),
        RawMessage::Text(text) => decode_control(&text).map(InboundFrame::Control),
    }
}

/// Parses a JSON control frame.
pub fn decode_control(text: &str) -> Result<ServerEvent, MalformedFrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MalformedFrameError::Json(e.to_string()))?;

    let object = match value {
        Value::Object(object) => object,
        other => return Err(MalformedFrameError::NotAnObject(json_kind(&other))),
    };

    let frame_type = object
        .get(wire::TYPE_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);
    let Some(frame_type) = frame_type else {
        return Ok(generic(None, object));
    };

    let event = match frame_type.as_str() {
        wire::CONNECTED => ServerEvent::Connected(body::<ConnectedEvent>(&frame_type, object)?),
        wire::TRANSCRIPT_INTERIM => {
            ServerEvent::TranscriptInterim(body::<TranscriptEvent>(&frame_type, object)?)
        }
        wire::TRANSCRIPT_FINAL => {
            ServerEvent::TranscriptFinal(body::<TranscriptEvent>(&frame_type, object)?)
        }
        wire::CLONE_RESPONSE => {
            ServerEvent::CloneResponse(body::<CloneResponseEvent>(&frame_type, object)?)
        }
        wire::AUDIO_RESPONSE => {
            ServerEvent::AudioResponse(body::<AudioResponseEvent>(&frame_type, object)?)
        }
        wire::ERROR => ServerEvent::Error(body::<ErrorEvent>(&frame_type, object)?),
        _ => generic(Some(frame_type), object),
    };
    Ok(event)
}

fn body<T: DeserializeOwned>(
    frame_type: &str,
    mut object: Map<String, Value>,
) -> Result<T, MalformedFrameError> {
    object.remove(wire::TYPE_FIELD);
    serde_json::from_value(Value::Object(object)).map_err(|e| MalformedFrameError::InvalidBody {
        frame_type: frame_type.to_string(),
        reason: e.to_string(),
    })
}

fn generic(event_type: Option<String>, object: Map<String, Value>) -> ServerEvent {
    ServerEvent::Message(GenericMessage::new(event_type, Value::Object(object)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
