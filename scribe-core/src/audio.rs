use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// The engine's native sample rate. Everything is resampled to this on ingest.
pub const SAMPLE_RATE: u32 = 16_000;
pub const CHANNELS: u16 = 1;
/// 16-bit signed PCM.
pub const SAMPLE_WIDTH: usize = 2;
pub const CHUNK_DURATION_MS: u32 = 40;
/// 640 samples at 16 kHz.
pub const CHUNK_SAMPLES: usize = (SAMPLE_RATE as usize * CHUNK_DURATION_MS as usize) / 1000;
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * SAMPLE_WIDTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkMetadata {
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default)]
    timestamp_ns: u64,
    #[serde(default)]
    sequence: u64,
}

fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}

/// One binary audio frame.
///
/// Wire layout: `u32_le(metadata_len) || metadata JSON || 16-bit LE PCM`.
/// `timestamp_ns` and `sequence` are advisory; ordering is guaranteed by
/// the transport, not by these fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub pcm: Bytes,
    pub sample_rate: u32,
    pub timestamp_ns: u64,
    pub sequence: u64,
}

impl AudioChunk {
    pub fn new(pcm: impl Into<Bytes>, sample_rate: u32, timestamp_ns: u64, sequence: u64) -> Self {
        AudioChunk {
            pcm: pcm.into(),
            sample_rate,
            timestamp_ns,
            sequence,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let metadata = serde_json::to_vec(&ChunkMetadata {
            sample_rate: self.sample_rate,
            timestamp_ns: self.timestamp_ns,
            sequence: self.sequence,
        })?;
        let mut buf = BytesMut::with_capacity(4 + metadata.len() + self.pcm.len());
        buf.put_u32_le(metadata.len() as u32);
        buf.put_slice(&metadata);
        buf.put_slice(&self.pcm);
        Ok(buf.freeze())
    }

    pub fn from_bytes(data: &[u8]) -> Result<AudioChunk, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::Truncated("missing length prefix"));
        }
        let metadata_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let Some(rest) = data.get(4..) else {
            return Err(ProtocolError::Truncated("missing metadata"));
        };
        if rest.len() < metadata_len {
            return Err(ProtocolError::Truncated("metadata exceeds frame"));
        }
        let metadata: ChunkMetadata = serde_json::from_slice(&rest[..metadata_len])?;
        Ok(AudioChunk {
            pcm: Bytes::copy_from_slice(&rest[metadata_len..]),
            sample_rate: metadata.sample_rate,
            timestamp_ns: metadata.timestamp_ns,
            sequence: metadata.sequence,
        })
    }

    /// Decode the PCM payload to f32 samples normalized to [-1, 1].
    pub fn decode_samples(&self) -> Vec<f32> {
        self.pcm
            .chunks_exact(SAMPLE_WIDTH)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect()
    }

    /// Decoded samples at the engine's target rate, resampling if the
    /// source rate differs.
    pub fn to_target_samples(&self) -> Result<Vec<f32>, ProtocolError> {
        let samples = self.decode_samples();
        if self.sample_rate == SAMPLE_RATE {
            return Ok(samples);
        }
        resample(&samples, self.sample_rate, SAMPLE_RATE)
    }
}

/// Encode f32 samples back to 16-bit LE PCM bytes.
pub fn pcm_from_samples(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &s in samples {
        let clamped = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        buf.put_i16_le(clamped);
    }
    buf.freeze()
}

/// Sinc resampler for mono f32 audio.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ProtocolError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    tracing::trace!(from_rate, to_rate, samples = samples.len(), "resampling");

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        to_rate as f64 / from_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| ProtocolError::Resample(e.to_string()))?;

    let waves_in = vec![samples.to_vec()];
    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| ProtocolError::Resample(e.to_string()))?;

    Ok(waves_out.into_iter().next().unwrap_or_default())
}
