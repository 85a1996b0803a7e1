//! Shared fixtures for server tests.

use crate::auth::AuthManager;
use crate::config::{Environment, ServerConfig};
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::token_store::TokenStore;
use scribe_core::{round_ms, TranscriptionResult, WordTiming};
use scribe_engine::{EngineAdapter, EngineError, ModelLoader, SpeechModel, TranscribeOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic model: two words spread over the input duration.
pub struct EchoModel;

impl SpeechModel for EchoModel {
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, EngineError> {
        let duration = samples.len() as f64 / scribe_core::SAMPLE_RATE as f64;
        Ok(TranscriptionResult {
            text: "hello world".to_string(),
            words: vec![
                WordTiming::new("hello", 0.0, duration / 2.0, 0.98),
                WordTiming::new("world", duration / 2.0, duration, 0.97),
            ],
            duration: round_ms(duration),
            language: options.language.clone().or_else(|| Some("en".to_string())),
            language_probability: Some(0.9),
        })
    }

    fn transcribe_file(
        &self,
        _path: &Path,
        language: Option<&str>,
    ) -> Result<TranscriptionResult, EngineError> {
        Ok(TranscriptionResult {
            text: "file transcript".to_string(),
            duration: 1.0,
            language: language.map(str::to_string).or_else(|| Some("en".to_string())),
            ..TranscriptionResult::default()
        })
    }

    fn preview(&self, _chunk: &[f32]) -> Option<String> {
        Some("partial".to_string())
    }
}

pub struct EchoLoader;

impl ModelLoader for EchoLoader {
    fn load(&self) -> Result<Arc<dyn SpeechModel>, EngineError> {
        Ok(Arc::new(EchoModel))
    }
}

pub fn echo_engine() -> Arc<EngineAdapter> {
    Arc::new(EngineAdapter::new(Arc::new(EchoLoader), false))
}

/// Model that always fails inference.
pub struct FailingModel;

impl SpeechModel for FailingModel {
    fn transcribe(
        &self,
        _samples: &[f32],
        _options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, EngineError> {
        Err(EngineError::runtime("decoder exploded"))
    }

    fn transcribe_file(
        &self,
        _path: &Path,
        _language: Option<&str>,
    ) -> Result<TranscriptionResult, EngineError> {
        Err(EngineError::runtime("decoder exploded"))
    }
}

pub struct FailingLoader;

impl ModelLoader for FailingLoader {
    fn load(&self) -> Result<Arc<dyn SpeechModel>, EngineError> {
        Ok(Arc::new(FailingModel))
    }
}

pub fn failing_engine() -> Arc<EngineAdapter> {
    Arc::new(EngineAdapter::new(Arc::new(FailingLoader), false))
}

/// An `AppState` backed by a fresh token store in `dir`.
pub fn app_state(dir: &TempDir, engine: Option<Arc<EngineAdapter>>) -> AppState {
    let (store, _) = TokenStore::open(dir.path().join("tokens.json")).expect("open store");
    AppState::new(
        Arc::new(AuthManager::new(store)),
        Arc::new(RateLimiter::default()),
        engine,
        Arc::new(ServerConfig::default()),
        Environment::Development,
        true,
    )
}
