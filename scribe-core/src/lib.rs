//! Wire protocol for the scribe remote transcription server.
//!
//! Two message kinds travel over a single WebSocket: UTF-8 JSON control
//! frames and length-prefixed binary audio frames. This crate defines both,
//! plus the transcription result types shared with the engine.

pub mod audio;
pub mod control;
pub mod error;
pub mod frame;
pub mod result;

pub use audio::{
    pcm_from_samples, resample, AudioChunk, CHANNELS, CHUNK_BYTES, CHUNK_DURATION_MS,
    CHUNK_SAMPLES, SAMPLE_RATE, SAMPLE_WIDTH,
};
pub use control::{unix_timestamp, ControlMessage, MessageType};
pub use error::ProtocolError;
pub use frame::Frame;
pub use result::{realtime_message, round_ms, TranscriptionResult, WordTiming};
