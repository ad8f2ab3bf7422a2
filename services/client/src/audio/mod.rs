//! Audio plumbing shared by the capture and playback pipelines.
//!
//! Speech travels inside the JSON protocol as base64-encoded little-endian
//! PCM16, mono. Microphone input is resampled down to the wire rate before
//! encoding; synthesized speech is resampled from the service rate up to
//! whatever the output device wants.

use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

pub mod capture;
pub mod playback;

pub use capture::CapturePipeline;
pub use playback::{PlaybackPipeline, SequenceBuffer};

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1, // mono
    )?;
    Ok(resampler)
}

/// Pushes a buffer of samples through a resampler chunk by chunk.
pub fn resample(resampler: &mut FastFixedIn<f32>, samples: &[f32]) -> Vec<f32> {
    let chunk_size = resampler.input_frames_next();
    let mut out = Vec::new();
    for chunk in samples.chunks(chunk_size) {
        if let Ok(res) = resampler.process(&[chunk.to_vec()], None) {
            out.extend_from_slice(&res[0]);
        }
    }
    out
}

/// Decodes a base64 string of PCM16 audio into normalized f32 samples.
pub fn decode_f32_from_base64_i16(base64_fragment: &str) -> Vec<f32> {
    if let Ok(pcm16_bytes) = base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        pcm16_bytes
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect()
    } else {
        tracing::error!("Failed to decode base64 fragment to f32");
        Vec::new()
    }
}

/// Encodes f32 samples into a base64 string of PCM16.
pub fn encode_f32_to_base64_i16(pcm32: &[f32]) -> String {
    let pcm16: Vec<u8> = pcm32
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes().to_vec()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 16000.0, 1024).is_ok());
        assert!(create_resampler(24000.0, 24000.0, 1024).is_ok());
    }

    #[test]
    fn test_decode_known_values() {
        // i16 value 16384 = [0x00, 0x40] little endian; normalized = 0.5
        let test_data = vec![0x00u8, 0x40u8, 0x00u8, 0x80u8]; // [16384, -32768]
        let base64_input = base64::engine::general_purpose::STANDARD.encode(&test_data);

        let result = decode_f32_from_base64_i16(&base64_input);
        assert_eq!(result.len(), 2);
        assert_abs_diff_eq!(result[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_f32_from_base64_i16("not base64!").is_empty());
        assert!(decode_f32_from_base64_i16("").is_empty());

        // An odd byte cannot form an i16; chunks_exact skips it.
        let base64_input = base64::engine::general_purpose::STANDARD.encode([0x00u8]);
        assert!(decode_f32_from_base64_i16(&base64_input).is_empty());
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let encoded = encode_f32_to_base64_i16(&[2.0, -2.0, 0.5]);
        let decoded = decode_f32_from_base64_i16(&encoded);
        assert_eq!(decoded.len(), 3);
        assert!(decoded[0] <= 1.0);
        assert!(decoded[1] >= -1.0);
        assert_abs_diff_eq!(decoded[2], 0.5, epsilon = 0.001);
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let mut resampler = create_resampler(48000.0, 16000.0, 256).unwrap();
        let input = vec![0.25f32; 1024];
        let output = resample(&mut resampler, &input);
        // 3:1 downsampling; FastFixedIn keeps the ratio exact per chunk.
        assert!(!output.is_empty());
        assert!(output.len() <= input.len() / 2);
    }
}
