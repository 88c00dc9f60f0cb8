//! Impulse response resampling using rubato
//!
//! Control-path only. Converts a mono impulse response to the engine rate
//! with rubato's FFT resampler and compensates its output delay so the
//! response stays time-aligned.

use rubato::{FftFixedIn, Resampler};

use crate::error::IrLoadError;

/// Input chunk size fed to the resampler
const CHUNK_SIZE: usize = 1024;

/// Sub-chunks per chunk (quality/speed trade-off)
const SUB_CHUNKS: usize = 2;

/// Resample a mono signal from `source_rate` to `target_rate`
pub fn resample_mono(
    input: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, IrLoadError> {
    if source_rate == target_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(IrLoadError::InvalidSampleRate {
            sample_rate: source_rate.min(target_rate) as f64,
        });
    }

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )
    .map_err(|e| IrLoadError::Resample {
        reason: e.to_string(),
    })?;

    let ratio = target_rate as f64 / source_rate as f64;
    let expected_output_frames = (input.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected_output_frames + delay + CHUNK_SIZE * 2);
    let mut chunk = vec![0.0f32; CHUNK_SIZE];
    let mut pos = 0;

    // Keep feeding (zero-padded) chunks until the delayed output is complete
    while output.len() < expected_output_frames + delay {
        let needed = resampler.input_frames_next();
        chunk.resize(needed, 0.0);
        chunk.fill(0.0);
        if pos < input.len() {
            let take = needed.min(input.len() - pos);
            chunk[..take].copy_from_slice(&input[pos..pos + take]);
        }
        pos += needed;

        let processed = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(|e| IrLoadError::Resample {
                reason: e.to_string(),
            })?;
        if let Some(channel) = processed.first() {
            output.extend_from_slice(channel);
        }
    }

    let end = (delay + expected_output_frames).min(output.len());
    Ok(output[delay.min(end)..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_resample_needed() {
        let input = vec![1.0, 0.5, 0.25];
        assert_eq!(resample_mono(&input, 48000, 48000).unwrap(), input);
    }

    #[test]
    fn test_upsample_length() {
        let input: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 44100.0).sin())
            .collect();
        let output = resample_mono(&input, 44100, 48000).unwrap();
        assert_eq!(output.len(), 4800);
    }

    #[test]
    fn test_downsample_preserves_impulse_position() {
        let mut input = vec![0.0f32; 9600];
        input[960] = 1.0;
        let output = resample_mono(&input, 96000, 48000).unwrap();
        assert_eq!(output.len(), 4800);

        let peak_index = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak_index as i64 - 480).abs() <= 2, "peak at {}", peak_index);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            resample_mono(&[1.0], 0, 48000),
            Err(IrLoadError::InvalidSampleRate { .. })
        ));
    }
}
