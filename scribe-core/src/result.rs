use crate::control::{ControlMessage, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Round a time in seconds to millisecond precision for the wire.
pub fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// One word with its timing, times in seconds from the start of the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: f64,
}

impl WordTiming {
    pub fn new(word: impl Into<String>, start: f64, end: f64, probability: f64) -> Self {
        WordTiming {
            word: word.into(),
            start: round_ms(start),
            end: round_ms(end),
            probability: round_ms(probability),
        }
    }
}

/// A completed transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub words: Vec<WordTiming>,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_probability: Option<f64>,
}

impl TranscriptionResult {
    /// The `final` control message closing a streaming session.
    pub fn to_final_message(&self) -> ControlMessage {
        ControlMessage::new(
            MessageType::Final,
            json!({
                "text": self.text,
                "words": self.words,
                "duration": round_ms(self.duration),
                "language": self.language,
                "is_final": true,
            }),
        )
    }
}

/// A best-effort partial transcription emitted mid-stream.
pub fn realtime_message(text: &str) -> ControlMessage {
    ControlMessage::new(
        MessageType::Realtime,
        json!({ "text": text, "is_final": false }),
    )
}
