use serde_json::{Map, Value};

/// `connected` event, the handshake acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConnectedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ConnectedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// `transcript_interim` and `transcript_final` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptEvent {
    /// The recognized text so far (interim) or for the whole utterance (final)
    text: String,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TranscriptEvent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            extra: Map::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// `clone_response` event. The body is backend defined and kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CloneResponseEvent {
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl CloneResponseEvent {
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }
}

/// `audio_response` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioResponseEvent {
    /// Base64 encoded PCM16 audio, when the backend inlines it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<String>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl AudioResponseEvent {
    pub fn audio(&self) -> Option<&str> {
        self.audio.as_deref()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// `error` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    message: String,

    /// Backends send either numeric or string codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<Value>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ErrorEvent {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            code: None,
            extra: Map::new(),
        }
    }

    pub fn with_code(mut self, code: Value) -> Self {
        self.code = Some(code);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&Value> {
        self.code.as_ref()
    }
}

/// A control frame whose `type` was absent or not recognized.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericMessage {
    event_type: Option<String>,
    body: Value,
}

impl GenericMessage {
    pub fn new(event_type: Option<String>, body: Value) -> Self {
        Self { event_type, body }
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// The full structured body as received, `type` included.
    pub fn body(&self) -> &Value {
        &self.body
    }
}
