//! Impulse response file decoding
//!
//! Decoding is a collaborator of the convolution engine: anything that can
//! produce interleaved float samples plus a rate and channel count can feed
//! an IR. The crate ships a WAV decoder built on hound and an AIFF/FLAC
//! decoder built on symphonia.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::convolution::ir::IrBuffer;
use crate::error::{DoomError, Result};

/// Decoded audio handed to the IR loader
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// Mix down to a mono [`IrBuffer`]
    pub fn into_ir_buffer(self) -> IrBuffer {
        IrBuffer::from_interleaved(&self.samples, self.channels, self.sample_rate)
    }
}

/// Turns an IR file into samples
pub trait IrDecoder: Send + Sync {
    /// Lower-case file extensions this decoder handles
    fn extensions(&self) -> &[&'static str];

    fn decode(&self, path: &Path) -> Result<DecodedAudio>;

    /// True when the path's extension is one of [`IrDecoder::extensions`]
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions().iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

/// WAV decoder: 8/16/24/32-bit integer and 32-bit float
#[derive(Debug, Clone, Copy, Default)]
pub struct WavIrDecoder;

impl IrDecoder for WavIrDecoder {
    fn extensions(&self) -> &[&'static str] {
        &["wav"]
    }

    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        let file = File::open(path).map_err(|e| DoomError::io(path, e))?;
        let reader = WavReader::new(BufReader::new(file)).map_err(|e| DoomError::Format {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(DoomError::Format {
                reason: format!("{}: no channels", path.display()),
            });
        }

        let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
        log::debug!(
            "Decoded IR {}: {} Hz, {} ch, {} frames",
            path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() / spec.channels as usize
        );

        Ok(DecodedAudio {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels as usize,
        })
    }
}

fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let scale = match (sample_format, bits_per_sample) {
        (SampleFormat::Float, 32) => {
            return reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| format_error("float", e))
        }
        (SampleFormat::Int, 8) => 128.0,
        (SampleFormat::Int, 16) => 32768.0,
        (SampleFormat::Int, 24) => 8388608.0,
        (SampleFormat::Int, 32) => 2147483648.0,
        (format, bits) => {
            return Err(DoomError::Format {
                reason: format!("unsupported WAV sample format: {:?} {}-bit", format, bits),
            })
        }
    };

    // hound widens every integer depth to i32
    reader
        .samples::<i32>()
        .map(|s| s.map(|v| (v as f64 / scale) as f32))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| format_error(&format!("{}-bit", bits_per_sample), e))
}

fn format_error(what: &str, e: hound::Error) -> DoomError {
    DoomError::Format {
        reason: format!("failed to read {} samples: {}", what, e),
    }
}

/// AIFF and FLAC decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaIrDecoder;

impl IrDecoder for SymphoniaIrDecoder {
    fn extensions(&self) -> &[&'static str] {
        &["aiff", "aif", "flac"]
    }

    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        let file = File::open(path).map_err(|e| DoomError::io(path, e))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| symphonia_error(path, e))?;
        let mut reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DoomError::Format {
                reason: format!("{}: no audio track", path.display()),
            })?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count());
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| symphonia_error(path, e))?;

        let mut samples = Vec::new();
        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(symphonia_error(path, e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // A corrupt packet is skipped, not fatal
                Err(SymphoniaError::DecodeError(reason)) => {
                    log::warn!("Skipping bad packet in {}: {}", path.display(), reason);
                    continue;
                }
                Err(e) => return Err(symphonia_error(path, e)),
            };
            let spec = *decoded.spec();
            sample_rate.get_or_insert(spec.rate);
            channels.get_or_insert(spec.channels.count());

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let (sample_rate, channels) = match (sample_rate, channels) {
            (Some(rate), Some(channels)) if channels > 0 => (rate, channels),
            _ => {
                return Err(DoomError::Format {
                    reason: format!("{}: missing sample rate or channel layout", path.display()),
                })
            }
        };
        log::debug!(
            "Decoded IR {}: {} Hz, {} ch, {} frames",
            path.display(),
            sample_rate,
            channels,
            samples.len() / channels
        );

        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
        })
    }
}

fn symphonia_error(path: &Path, e: SymphoniaError) -> DoomError {
    match e {
        SymphoniaError::IoError(source) => DoomError::io(path, source),
        other => DoomError::Format {
            reason: format!("{}: {}", path.display(), other),
        },
    }
}

/// Every decoder the crate ships, WAV first
pub fn default_decoders() -> Vec<Box<dyn IrDecoder>> {
    vec![Box::new(WavIrDecoder), Box::new(SymphoniaIrDecoder)]
}

/// First decoder that handles `path`'s extension
pub fn decoder_for<'a>(
    decoders: &'a [Box<dyn IrDecoder>],
    path: &Path,
) -> Result<&'a dyn IrDecoder> {
    decoders
        .iter()
        .find(|d| d.supports(path))
        .map(|d| &**d)
        .ok_or_else(|| DoomError::Format {
            reason: format!("{}: unsupported impulse response format", path.display()),
        })
}
