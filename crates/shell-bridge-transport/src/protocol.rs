//! Wire protocol for device-controller communication.
//!
//! Every frame is one JSON object tagged by its `type` field.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use shell_bridge_core::MetricsSnapshot;

/// Inbound frame that could not be decoded into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protocol message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Terminal output produced by the shell.
    Output { output: String },
    /// Raw keystrokes for the shell.
    Input { data: String },
    /// A line to submit to the shell.
    Command { command: String },
    /// Resize the terminal.
    Resize { cols: u16, rows: u16 },
    /// Named one-shot action, e.g. `screenshot`.
    Action { action: String },
    /// Keep-alive carrying uptime in milliseconds.
    Ping { uptime: u64 },
    /// Keep-alive reply.
    Pong,
    /// Host telemetry sample.
    Metrics { data: MetricsSnapshot },
    /// Encoded screen image (base64).
    Screenshot { data: String },
}

impl Message {
    /// Create an output message from terminal bytes.
    ///
    /// Invalid UTF-8 is replaced; callers that split a stream into chunks
    /// should cut on character boundaries first.
    #[must_use]
    pub fn output(data: &[u8]) -> Self {
        Self::Output {
            output: String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Create a screenshot message from encoded image bytes.
    #[must_use]
    pub fn screenshot(image: &[u8]) -> Self {
        Self::Screenshot {
            data: BASE64.encode(image),
        }
    }

    /// Create a metrics message.
    #[must_use]
    pub const fn metrics(data: MetricsSnapshot) -> Self {
        Self::Metrics { data }
    }

    /// Decode screenshot image bytes from base64.
    #[must_use]
    pub fn decode_screenshot(&self) -> Option<Vec<u8>> {
        if let Self::Screenshot { data } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }

    /// The `type` tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Input { .. } => "input",
            Self::Command { .. } => "command",
            Self::Resize { .. } => "resize",
            Self::Action { .. } => "action",
            Self::Ping { .. } => "ping",
            Self::Pong => "pong",
            Self::Metrics { .. } => "metrics",
            Self::Screenshot { .. } => "screenshot",
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    /// Returns `DecodeError` for unknown kinds and for missing or mistyped fields.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}
