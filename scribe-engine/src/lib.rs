//! Transcription engine adapter.
//!
//! The speech model itself is pluggable: backends implement [`SpeechModel`]
//! and [`ModelLoader`], and the [`EngineAdapter`] owns the lifecycle around
//! them - lazy loading, explicit unloading with device-memory release, busy
//! rejection, and the voice-activity pre-pass for final transcription.

pub mod adapter;
pub mod error;
pub mod model;
pub mod vad;

pub use adapter::EngineAdapter;
pub use error::EngineError;
pub use model::{ModelLoader, SpeechModel, TranscribeOptions};
