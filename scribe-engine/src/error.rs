use thiserror::Error;

/// Errors surfaced by the engine adapter.
///
/// The session server maps every variant to a generic wire error and keeps
/// the detail in the operator log.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unload was requested while a transcription is in flight.
    #[error("engine busy: transcription in flight")]
    Busy,

    /// The model could not be loaded. `hint` carries operator-facing
    /// remediation (typically: clear the model cache directory).
    #[error("model load failed: {message}")]
    Load {
        message: String,
        hint: Option<String>,
    },

    /// Inference failed after the model was loaded.
    #[error("transcription failed: {0}")]
    Runtime(String),
}

impl EngineError {
    pub fn load(message: impl Into<String>) -> Self {
        EngineError::Load {
            message: message.into(),
            hint: None,
        }
    }

    pub fn load_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        EngineError::Load {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_hint() {
        let err = EngineError::load_with_hint("disk quota exceeded", "clear ~/.cache/models");
        match err {
            EngineError::Load { hint, .. } => assert!(hint.is_some()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
