pub mod client;
pub mod server;

use serde_json::{Map, Value};

pub use client::{AskCommand, CustomCommand, SpeakCommand};
pub use server::{
    AudioResponseEvent, CloneResponseEvent, ConnectedEvent, ErrorEvent, GenericMessage,
    TranscriptEvent,
};

/// Values of the `type` discriminator understood on the wire.
pub mod wire {
    pub const CONNECTED: &str = "connected";
    pub const TRANSCRIPT_INTERIM: &str = "transcript_interim";
    pub const TRANSCRIPT_FINAL: &str = "transcript_final";
    pub const CLONE_RESPONSE: &str = "clone_response";
    pub const AUDIO_RESPONSE: &str = "audio_response";
    pub const ERROR: &str = "error";

    pub const SPEAK: &str = "speak";
    pub const ASK: &str = "ask";

    pub const TYPE_FIELD: &str = "type";
}

/// Commands the client sends to the backend as control frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Speak(SpeakCommand),
    Ask(AskCommand),
    /// Any other `{type, ...data}` command, for backend additions.
    Custom(CustomCommand),
}

impl ClientCommand {
    pub fn speak(text: &str) -> Self {
        ClientCommand::Speak(SpeakCommand::new(text))
    }

    pub fn ask(text: &str) -> Self {
        ClientCommand::Ask(AskCommand::new(text))
    }

    pub fn custom(command_type: &str, data: Map<String, Value>) -> Self {
        ClientCommand::Custom(CustomCommand::new(command_type, data))
    }

    pub fn command_type(&self) -> &str {
        match self {
            ClientCommand::Speak(_) => wire::SPEAK,
            ClientCommand::Ask(_) => wire::ASK,
            ClientCommand::Custom(custom) => custom.command_type(),
        }
    }

    /// The command body without its `type` discriminator.
    pub fn params(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let value = match self {
            ClientCommand::Speak(speak) => serde_json::to_value(speak)?,
            ClientCommand::Ask(ask) => serde_json::to_value(ask)?,
            ClientCommand::Custom(custom) => return Ok(custom.data().clone()),
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// A decoded inbound control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectedEvent),
    TranscriptInterim(TranscriptEvent),
    TranscriptFinal(TranscriptEvent),
    CloneResponse(CloneResponseEvent),
    AudioResponse(AudioResponseEvent),
    Error(ErrorEvent),
    /// Catch-all for absent or unrecognized `type` values.
    Message(GenericMessage),
}

impl ServerEvent {
    /// The wire `type` of this event, if it carried a string one.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ServerEvent::Connected(_) => Some(wire::CONNECTED),
            ServerEvent::TranscriptInterim(_) => Some(wire::TRANSCRIPT_INTERIM),
            ServerEvent::TranscriptFinal(_) => Some(wire::TRANSCRIPT_FINAL),
            ServerEvent::CloneResponse(_) => Some(wire::CLONE_RESPONSE),
            ServerEvent::AudioResponse(_) => Some(wire::AUDIO_RESPONSE),
            ServerEvent::Error(_) => Some(wire::ERROR),
            ServerEvent::Message(message) => message.event_type(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ServerEvent::Connected(_))
    }
}
