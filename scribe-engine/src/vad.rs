//! Energy-gated voice activity pre-pass.
//!
//! Frames whose RMS energy stays under the threshold are dropped before
//! final transcription. Callers fall back to the unfiltered samples when
//! the gate removes everything, so silence-heavy input never turns into a
//! spurious empty transcription.

/// 20 ms frames at 16 kHz.
const FRAME_SAMPLES: usize = 320;

/// RMS threshold below which a frame counts as silence.
const ENERGY_THRESHOLD: f32 = 0.005;

fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

/// Keep only frames that carry voice energy, preserving order.
pub fn filter_voiced(samples: &[f32]) -> Vec<f32> {
    let mut voiced = Vec::with_capacity(samples.len());
    for frame in samples.chunks(FRAME_SAMPLES) {
        if frame_rms(frame) >= ENERGY_THRESHOLD {
            voiced.extend_from_slice(frame);
        }
    }
    voiced
}
