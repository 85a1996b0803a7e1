use crate::error::EngineError;
use scribe_core::TranscriptionResult;
use std::path::Path;
use std::sync::Arc;

/// Per-request transcription options.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// ISO language code; `None` means autodetect.
    pub language: Option<String>,
    /// Whether the result must carry word-level timings.
    pub word_timestamps: bool,
}

/// The speech model behind the adapter.
///
/// Implementations run blocking CPU/GPU work; the adapter calls them from a
/// worker thread. Decoding strategy, beam search, and file demuxing are the
/// backend's business and are deliberately not modeled here.
pub trait SpeechModel: Send + Sync {
    /// Transcribe 16 kHz mono f32 samples.
    fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, EngineError>;

    /// Transcribe an audio file on disk (one-shot uploads).
    fn transcribe_file(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<TranscriptionResult, EngineError>;

    /// Best-effort partial transcription of a single chunk. `None` means
    /// "no preview available right now" and is never an error.
    fn preview(&self, _chunk: &[f32]) -> Option<String> {
        None
    }

    /// Release device memory held by the model. Called once on unload,
    /// after the adapter has dropped its own reference.
    fn release(&self) {}
}

/// Produces a loaded model. Load errors should carry an operator hint
/// (see [`EngineError::load_with_hint`]) when the remediation is known,
/// e.g. clearing a corrupt download cache.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn SpeechModel>, EngineError>;
}
