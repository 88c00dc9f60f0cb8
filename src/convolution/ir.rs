//! Impulse response preparation
//!
//! Everything here runs on the control path: mono mixdown, resampling to the
//! engine rate, tail trimming, length capping, energy normalisation and
//! partitioning into the spectra the convolver consumes.

use std::sync::atomic::{AtomicU64, Ordering};

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::config::EngineConfig;
use crate::dsp::resample::resample_mono;
use crate::error::IrLoadError;

static NEXT_IR_ID: AtomicU64 = AtomicU64::new(1);

/// Mono impulse response at its source sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct IrBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl IrBuffer {
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Mix interleaved frames down to mono by averaging the channels
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        if channels == 1 {
            return Self::from_mono(interleaved.to_vec(), sample_rate);
        }
        let scale = 1.0 / channels as f32;
        let samples = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect();
        Self::from_mono(samples, sample_rate)
    }

    /// Mix planar channels down to mono
    pub fn from_channels(channels: &[Vec<f32>], sample_rate: u32) -> Self {
        match channels {
            [] => Self::from_mono(Vec::new(), sample_rate),
            [mono] => Self::from_mono(mono.clone(), sample_rate),
            _ => {
                let len = channels.iter().map(Vec::len).min().unwrap_or(0);
                let scale = 1.0 / channels.len() as f32;
                let samples = (0..len)
                    .map(|i| channels.iter().map(|ch| ch[i]).sum::<f32>() * scale)
                    .collect();
                Self::from_mono(samples, sample_rate)
            }
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// How an impulse response is turned into a [`PreparedIr`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrPrepareOptions {
    /// Engine sample rate the IR is resampled to
    pub target_rate: u32,
    /// Partition size; must equal the engine block size
    pub partition_size: usize,
    /// Cap on the prepared length in samples
    pub max_length: usize,
    /// Tail energy below this level (dB relative to the total) is dropped
    pub trim_threshold_db: f32,
    /// Scale to unit energy
    pub normalize: bool,
}

impl IrPrepareOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            target_rate: config.sample_rate,
            partition_size: config.block_size,
            max_length: config.max_ir_length,
            trim_threshold_db: config.ir_trim_threshold_db,
            normalize: config.normalize_ir,
        }
    }

    /// Same options with a tighter length cap
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

/// Partitioned, frequency-domain impulse response ready for the audio path
#[derive(Debug, Clone)]
pub struct PreparedIr {
    id: u64,
    partition_size: usize,
    /// One spectrum of `2 * partition_size` bins per partition
    partitions: Vec<Vec<Complex<f32>>>,
    /// Length after trim and cap
    length: usize,
    /// Length after resampling, before trim and cap
    source_length: usize,
    sample_rate: u32,
    time_domain: Vec<f32>,
}

impl PreparedIr {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    pub fn fft_size(&self) -> usize {
        self.partition_size * 2
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub(crate) fn partition(&self, index: usize) -> &[Complex<f32>] {
        &self.partitions[index]
    }

    /// Effective convolution length in samples
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn source_length(&self) -> usize {
        self.source_length
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The trimmed, capped and normalised time-domain response
    pub fn samples(&self) -> &[f32] {
        &self.time_domain
    }

    /// Approximate heap footprint in samples, used for cache accounting
    pub fn footprint_samples(&self) -> usize {
        self.time_domain.len() + self.partitions.len() * self.fft_size() * 2
    }
}

/// Index one past the last sample whose tail still carries energy above
/// `threshold_db` relative to the total
fn trimmed_length(samples: &[f32], threshold_db: f32) -> usize {
    let total: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if total <= 0.0 {
        return 0;
    }
    let floor = total * 10f64.powf(threshold_db as f64 / 10.0);
    let mut tail = 0.0f64;
    for (i, &s) in samples.iter().enumerate().rev() {
        tail += (s as f64) * (s as f64);
        if tail > floor {
            return i + 1;
        }
    }
    0
}

/// Run the full preparation pipeline
pub fn prepare_ir(ir: &IrBuffer, options: &IrPrepareOptions) -> Result<PreparedIr, IrLoadError> {
    if ir.is_empty() {
        return Err(IrLoadError::Empty);
    }
    if ir.sample_rate() == 0 {
        return Err(IrLoadError::InvalidSampleRate {
            sample_rate: ir.sample_rate() as f64,
        });
    }
    if options.partition_size == 0 || options.target_rate == 0 {
        return Err(IrLoadError::InvalidSampleRate {
            sample_rate: options.target_rate as f64,
        });
    }

    let sanitized: Vec<f32> = ir
        .samples()
        .iter()
        .map(|&s| if s.is_finite() { s } else { 0.0 })
        .collect();

    let mut samples = if ir.sample_rate() == options.target_rate {
        sanitized
    } else {
        resample_mono(&sanitized, ir.sample_rate(), options.target_rate)?
    };
    let source_length = samples.len();

    let keep = trimmed_length(&samples, options.trim_threshold_db);
    if keep == 0 {
        return Err(IrLoadError::Silent);
    }
    samples.truncate(keep.min(options.max_length.max(1)));

    if options.normalize {
        let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        if energy > 0.0 {
            let scale = (1.0 / energy.sqrt()) as f32;
            samples.iter_mut().for_each(|s| *s *= scale);
        }
    }

    let b = options.partition_size;
    let n = 2 * b;
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);

    let partitions = samples
        .chunks(b)
        .map(|chunk| {
            let mut spectrum = vec![Complex::new(0.0, 0.0); n];
            for (bin, &s) in spectrum.iter_mut().zip(chunk) {
                bin.re = s;
            }
            fft.process(&mut spectrum);
            spectrum
        })
        .collect();

    Ok(PreparedIr {
        id: NEXT_IR_ID.fetch_add(1, Ordering::Relaxed),
        partition_size: b,
        partitions,
        length: samples.len(),
        source_length,
        sample_rate: options.target_rate,
        time_domain: samples,
    })
}
