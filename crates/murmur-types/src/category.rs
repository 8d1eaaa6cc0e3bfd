use crate::codec::MalformedFrameError;
use crate::events::ServerEvent;
use crate::events::server::{
    AudioResponseEvent, CloneResponseEvent, ConnectedEvent, ErrorEvent, GenericMessage,
    TranscriptEvent,
};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The fixed set of broker categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    Connected,
    Disconnected,
    TranscriptInterim,
    TranscriptFinal,
    CloneResponse,
    AudioResponse,
    Error,
    Message,
}

impl EventCategory {
    pub const ALL: [EventCategory; 8] = [
        EventCategory::Connected,
        EventCategory::Disconnected,
        EventCategory::TranscriptInterim,
        EventCategory::TranscriptFinal,
        EventCategory::CloneResponse,
        EventCategory::AudioResponse,
        EventCategory::Error,
        EventCategory::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Connected => "connected",
            EventCategory::Disconnected => "disconnected",
            EventCategory::TranscriptInterim => "transcript:interim",
            EventCategory::TranscriptFinal => "transcript:final",
            EventCategory::CloneResponse => "clone:response",
            EventCategory::AudioResponse => "audio:response",
            EventCategory::Error => "error",
            EventCategory::Message => "message",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event category `{0}`")]
pub struct UnknownCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Where an `error` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Handshake rejected; the token must be replaced before reconnecting.
    Auth,
    /// Network-level close or failure.
    Transport,
    MalformedFrame,
    RetryExhausted,
    /// An `error` control frame sent by the backend.
    Server,
}

/// Payload of the `error` category.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    kind: FaultKind,
    message: String,
    code: Option<Value>,
    fatal: bool,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            fatal: false,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_code(mut self, code: Option<Value>) -> Self {
        self.code = code;
        self
    }

    pub fn server(event: &ErrorEvent) -> Self {
        Self::new(FaultKind::Server, event.message()).with_code(event.code().cloned())
    }

    pub fn malformed(error: &MalformedFrameError) -> Self {
        Self::new(FaultKind::MalformedFrame, error.to_string())
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&Value> {
        self.code.as_ref()
    }

    /// A fatal fault leaves the session CLOSED.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisconnectedEvent {
    reason: Option<String>,
}

impl DisconnectedEvent {
    pub fn new(reason: Option<String>) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// An event delivered through the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected(ConnectedEvent),
    Disconnected(DisconnectedEvent),
    TranscriptInterim(TranscriptEvent),
    TranscriptFinal(TranscriptEvent),
    CloneResponse(CloneResponseEvent),
    AudioResponse(AudioResponseEvent),
    /// Binary synthesized audio, published under `audio:response`.
    AudioChunk(Vec<u8>),
    Error(Fault),
    Message(GenericMessage),
}

impl Event {
    pub fn category(&self) -> EventCategory {
        match self {
            Event::Connected(_) => EventCategory::Connected,
            Event::Disconnected(_) => EventCategory::Disconnected,
            Event::TranscriptInterim(_) => EventCategory::TranscriptInterim,
            Event::TranscriptFinal(_) => EventCategory::TranscriptFinal,
            Event::CloneResponse(_) => EventCategory::CloneResponse,
            Event::AudioResponse(_) | Event::AudioChunk(_) => EventCategory::AudioResponse,
            Event::Error(_) => EventCategory::Error,
            Event::Message(_) => EventCategory::Message,
        }
    }
}

impl From<ServerEvent> for Event {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Connected(e) => Event::Connected(e),
            ServerEvent::TranscriptInterim(e) => Event::TranscriptInterim(e),
            ServerEvent::TranscriptFinal(e) => Event::TranscriptFinal(e),
            ServerEvent::CloneResponse(e) => Event::CloneResponse(e),
            ServerEvent::AudioResponse(e) => Event::AudioResponse(e),
            ServerEvent::Error(e) => Event::Error(Fault::server(&e)),
            ServerEvent::Message(e) => Event::Message(e),
        }
    }
}

impl From<Fault> for Event {
    fn from(fault: Fault) -> Self {
        Event::Error(fault)
    }
}
