//! WAV input for the standard-stream transport.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, VoxgateError};
use std::io::Read;

/// Whether `header` starts like a RIFF/WAVE file.
pub fn is_wav(header: &[u8]) -> bool {
    header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE"
}

/// Read a WAV stream as 16 kHz mono 16-bit samples.
///
/// Multi-channel audio is averaged down to mono; other rates are resampled
/// by linear interpolation.
pub fn read_wav<R: Read>(reader: R) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxgateError::AudioInput {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(VoxgateError::AudioFormatMismatch {
            expected: "16-bit integer PCM".to_string(),
            actual: format!("{}-bit {:?}", spec.bits_per_sample, spec.sample_format),
        });
    }

    let raw: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| VoxgateError::AudioInput {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let channels = spec.channels.max(1) as usize;
    let mono: Vec<i16> = if channels > 1 {
        raw.chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        raw
    };

    Ok(resample(&mono, spec.sample_rate, SAMPLE_RATE))
}

fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
