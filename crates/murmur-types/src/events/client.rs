use serde_json::{Map, Value};

/// `speak` command: synthesize `text` through the backend voice.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SpeakCommand {
    text: String,
}

impl SpeakCommand {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// `ask` command: send a question to the assistant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AskCommand {
    text: String,
}

impl AskCommand {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomCommand {
    command_type: String,
    data: Map<String, Value>,
}

impl CustomCommand {
    pub fn new(command_type: &str, data: Map<String, Value>) -> Self {
        Self {
            command_type: command_type.to_string(),
            data,
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}
