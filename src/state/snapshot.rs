//! Immutable configuration snapshots and their publication
//!
//! The control path builds a complete [`Snapshot`] and hands it to the
//! [`SnapshotPublisher`], which swaps it in atomically. The audio path holds
//! a [`SnapshotReader`]: one wait-free load per block, then an
//! acknowledgement of the generation it saw. Superseded snapshots sit on a
//! retire list until the reader has acknowledged a newer generation and
//! nothing else holds them, so the audio thread never frees a snapshot or
//! anything it owns.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::amp::{clamp_unit, AmpParameters, ModelHandle};
use crate::convolution::PreparedIr;
use crate::dsp::{MAX_GAIN_DB, MIN_GAIN_DB};
use crate::error::{DoomError, Result};

// ============================================================================
// Effect parameters
// ============================================================================

/// Compressor threshold range in dB mapped from 0..1
const COMPRESSOR_THRESHOLD_RANGE_DB: (f32, f32) = (-60.0, 0.0);
/// Gate threshold range in dB mapped from (0, 1]
const GATE_THRESHOLD_RANGE_DB: (f32, f32) = (-80.0, 0.0);
/// Compressor ratio range
pub const COMPRESSOR_RATIO_RANGE: (f32, f32) = (1.0, 20.0);

/// Dynamics, modulation and trim settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    /// Reverb wet level, 0..1
    pub reverb_level: f32,
    /// Delay echo level, 0..1
    pub delay_level: f32,
    /// Chorus wet level, 0..1
    pub chorus_level: f32,
    /// Compressor threshold, 0..1 over -60..0 dB
    pub compressor_threshold: f32,
    /// Compressor ratio, 1..20; 1 disables the compressor
    pub compressor_ratio: f32,
    /// Gate threshold, 0..1 over -80..0 dB; 0 disables the gate
    pub gate_threshold: f32,
    /// Input trim in dB
    pub input_gain_db: f32,
    /// Output trim in dB
    pub output_gain_db: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            reverb_level: 0.0,
            delay_level: 0.0,
            chorus_level: 0.0,
            compressor_threshold: 1.0,
            compressor_ratio: 1.0,
            gate_threshold: 0.0,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
        }
    }
}

fn clamp_range(value: f32, (lo, hi): (f32, f32)) -> f32 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

impl EffectParameters {
    /// Copy with every field coerced into range
    pub fn clamped(mut self) -> Self {
        self.reverb_level = clamp_unit(self.reverb_level);
        self.delay_level = clamp_unit(self.delay_level);
        self.chorus_level = clamp_unit(self.chorus_level);
        self.compressor_threshold = clamp_unit(self.compressor_threshold);
        self.compressor_ratio = clamp_range(self.compressor_ratio, COMPRESSOR_RATIO_RANGE);
        self.gate_threshold = clamp_unit(self.gate_threshold);
        self.input_gain_db = clamp_range(self.input_gain_db, (MIN_GAIN_DB, MAX_GAIN_DB));
        self.output_gain_db = clamp_range(self.output_gain_db, (MIN_GAIN_DB, MAX_GAIN_DB));
        self
    }

    /// Reject out-of-range or non-finite fields
    pub fn validate(&self) -> Result<()> {
        let unit = (0.0, 1.0);
        let checks = [
            ("reverb_level", self.reverb_level, unit),
            ("delay_level", self.delay_level, unit),
            ("chorus_level", self.chorus_level, unit),
            ("compressor_threshold", self.compressor_threshold, unit),
            ("compressor_ratio", self.compressor_ratio, COMPRESSOR_RATIO_RANGE),
            ("gate_threshold", self.gate_threshold, unit),
            ("input_gain_db", self.input_gain_db, (MIN_GAIN_DB, MAX_GAIN_DB)),
            ("output_gain_db", self.output_gain_db, (MIN_GAIN_DB, MAX_GAIN_DB)),
        ];
        for (name, value, (lo, hi)) in checks {
            if !value.is_finite() || value < lo || value > hi {
                return Err(DoomError::validation(
                    &format!("effects.{}", name),
                    format!("{} is outside {} to {}", value, lo, hi),
                ));
            }
        }
        Ok(())
    }

    pub fn compressor_threshold_db(&self) -> f32 {
        let (lo, hi) = COMPRESSOR_THRESHOLD_RANGE_DB;
        lo + clamp_unit(self.compressor_threshold) * (hi - lo)
    }

    /// Gate threshold in dB, `None` when the gate is off
    pub fn gate_threshold_db(&self) -> Option<f32> {
        let t = clamp_unit(self.gate_threshold);
        if t <= 0.0 {
            None
        } else {
            let (lo, hi) = GATE_THRESHOLD_RANGE_DB;
            Some(lo + t * (hi - lo))
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything the audio path needs for one block
///
/// Built on the control path and never mutated once published.
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: u64,
    pub amp: AmpParameters,
    pub model: Option<ModelHandle>,
    pub ir: Option<Arc<PreparedIr>>,
    /// File the active IR was loaded from
    pub ir_path: Option<PathBuf>,
    pub ir_wet_level: f32,
    pub effects: EffectParameters,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            id: 0,
            amp: AmpParameters::default(),
            model: None,
            ir: None,
            ir_path: None,
            ir_wet_level: 1.0,
            effects: EffectParameters::default(),
        }
    }
}

impl Snapshot {
    /// Generation assigned at publication; 0 for the initial snapshot
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source of the active model (`builtin:<name>` or a file path)
    pub fn model_source(&self) -> Option<&str> {
        self.model.as_ref().map(|handle| handle.source())
    }

    pub fn model_id(&self) -> Option<u64> {
        self.model.as_ref().map(|handle| handle.id())
    }

    pub fn ir_id(&self) -> Option<u64> {
        self.ir.as_ref().map(|ir| ir.id())
    }
}

// ============================================================================
// Publisher / reader
// ============================================================================

/// Audio-side view of the published snapshot
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    current: Arc<ArcSwap<Snapshot>>,
    acked: Arc<AtomicU64>,
}

impl SnapshotReader {
    /// Wait-free load of the latest snapshot
    #[inline]
    pub fn load(&self) -> Guard<Arc<Snapshot>> {
        self.current.load()
    }

    /// Report that the audio path has moved on to generation `id`
    #[inline]
    pub fn acknowledge(&self, id: u64) {
        self.acked.store(id, Ordering::Release);
    }
}

/// Control-side owner of the published snapshot
#[derive(Debug)]
pub struct SnapshotPublisher {
    current: Arc<ArcSwap<Snapshot>>,
    acked: Arc<AtomicU64>,
    inner: Mutex<PublisherState>,
}

#[derive(Debug)]
struct PublisherState {
    next_id: u64,
    retired: Vec<Arc<Snapshot>>,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot) -> Self {
        let initial = Snapshot { id: 0, ..initial };
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            acked: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(PublisherState {
                next_id: 1,
                retired: Vec::new(),
            }),
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            current: Arc::clone(&self.current),
            acked: Arc::clone(&self.acked),
        }
    }

    /// The published snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Stamp `next` with a fresh generation and make it current
    pub fn publish(&self, next: Snapshot) -> Arc<Snapshot> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let next = Arc::new(Snapshot { id, ..next });
        let previous = self.current.swap(Arc::clone(&next));
        inner.retired.push(previous);
        next
    }

    /// Generation most recently acknowledged by the audio path
    pub fn acknowledged(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }

    fn has_readers(&self) -> bool {
        Arc::strong_count(&self.acked) > 1
    }

    /// Free retired snapshots the audio path has provably left behind
    ///
    /// Returns the number freed.
    pub fn collect_garbage(&self) -> usize {
        let acked = self.acknowledged();
        let gated = self.has_readers();
        let mut inner = self.inner.lock();
        let before = inner.retired.len();
        inner
            .retired
            .retain(|snap| (gated && snap.id >= acked) || Arc::strong_count(snap) > 1);
        before - inner.retired.len()
    }

    pub fn retired_count(&self) -> usize {
        self.inner.lock().retired.len()
    }
}
