use crate::error::EngineError;
use crate::model::{ModelLoader, SpeechModel, TranscribeOptions};
use crate::vad;
use scribe_core::TranscriptionResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Owns the speech model lifecycle.
///
/// Loading is lazy (first transcription) and idempotent; unloading is an
/// explicit operator action that drops the model reference and runs the
/// backend's device-memory release hook. Unload is rejected while any
/// transcription is in flight.
pub struct EngineAdapter {
    loader: Arc<dyn ModelLoader>,
    vad_filter: bool,
    model: Mutex<Option<Arc<dyn SpeechModel>>>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("loaded", &self.is_loaded())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(counter.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EngineAdapter {
    pub fn new(loader: Arc<dyn ModelLoader>, vad_filter: bool) -> Self {
        EngineAdapter {
            loader,
            vad_filter,
            model: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Load the model if it is not already loaded. Repeated calls are no-ops.
    pub async fn load(&self) -> Result<(), EngineError> {
        if self.is_loaded() {
            debug!("model already loaded");
            return Ok(());
        }

        info!("loading transcription model");
        let loader = self.loader.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| EngineError::load(format!("load task failed: {e}")))??;

        let mut slot = self
            .model
            .lock()
            .map_err(|_| EngineError::load("model slot poisoned"))?;
        if slot.is_none() {
            *slot = Some(loaded);
            info!("transcription model loaded");
        } else {
            // Lost a load race; discard the duplicate and its device memory.
            loaded.release();
        }
        Ok(())
    }

    /// Drop the model and release device memory. Rejected while a
    /// transcription is running; a no-op when nothing is loaded.
    pub fn unload(&self) -> Result<(), EngineError> {
        if self.is_busy() {
            warn!("unload rejected: transcription in flight");
            return Err(EngineError::Busy);
        }
        let taken = self
            .model
            .lock()
            .map_err(|_| EngineError::load("model slot poisoned"))?
            .take();
        if let Some(model) = taken {
            info!("unloading transcription model");
            model.release();
        }
        Ok(())
    }

    fn loaded_model(&self) -> Option<Arc<dyn SpeechModel>> {
        self.model.lock().ok().and_then(|m| m.clone())
    }

    async fn ensure_loaded(&self) -> Result<Arc<dyn SpeechModel>, EngineError> {
        if let Some(model) = self.loaded_model() {
            return Ok(model);
        }
        self.load().await?;
        self.loaded_model()
            .ok_or_else(|| EngineError::load("model unloaded during load"))
    }

    /// Final transcription of accumulated 16 kHz mono samples.
    pub async fn transcribe(
        &self,
        samples: Vec<f32>,
        options: TranscribeOptions,
    ) -> Result<TranscriptionResult, EngineError> {
        let model = self.ensure_loaded().await?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        let audio = if self.vad_filter {
            let voiced = vad::filter_voiced(&samples);
            if voiced.is_empty() {
                // The gate removed everything; transcribe the original so a
                // quiet recording does not come back empty.
                debug!("vad pass removed all frames, using unfiltered audio");
                samples
            } else {
                voiced
            }
        } else {
            samples
        };

        info!(
            seconds = audio.len() as f64 / scribe_core::SAMPLE_RATE as f64,
            "transcribing session audio"
        );
        tokio::task::spawn_blocking(move || model.transcribe(&audio, &options))
            .await
            .map_err(|e| EngineError::runtime(format!("transcription task failed: {e}")))?
    }

    /// One-shot transcription of an uploaded file.
    pub async fn transcribe_file(
        &self,
        path: PathBuf,
        language: Option<String>,
    ) -> Result<TranscriptionResult, EngineError> {
        let model = self.ensure_loaded().await?;
        let _guard = InFlightGuard::enter(&self.in_flight);

        info!(path = %path.display(), "transcribing uploaded file");
        tokio::task::spawn_blocking(move || model.transcribe_file(&path, language.as_deref()))
            .await
            .map_err(|e| EngineError::runtime(format!("transcription task failed: {e}")))?
    }

    /// Best-effort preview of a single chunk. Returns `None` when the model
    /// is not loaded or the backend has nothing to say; never an error and
    /// never triggers a load.
    pub fn preview(&self, chunk: &[f32]) -> Option<String> {
        self.loaded_model()?.preview(chunk)
    }
}
