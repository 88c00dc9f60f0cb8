//! Uniform partitioned overlap-save convolver
//!
//! Input is collected into partitions of `B` samples. At each partition
//! boundary the last `2B` input samples are transformed and pushed into a
//! frequency-domain delay line, and the wet output for the next partition is
//! the inverse transform of the delay line multiplied against the IR spectra.
//! Output therefore lags input by exactly `B` samples; the dry signal used
//! for mixing is delayed by the same amount.
//!
//! The delay line is fed on every boundary whether or not an IR is active,
//! so switching IRs (or switching from bypass) never starts from an empty
//! history. Every switch is an equal-power crossfade over one partition.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::convolution::ir::PreparedIr;
use crate::dsp::SmoothedValue;

/// Where the convolver is in an IR transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// Output comes from the rendered IR alone
    Steady,
    /// Crossfading from the IR with this id (`None` for bypass) to the
    /// rendered one
    Fading { from: Option<u64> },
}

pub(crate) struct PartitionedConvolver {
    block: usize,
    fft_size: usize,
    max_partitions: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Previous partition followed by the partition being collected
    window: Vec<f32>,
    /// Frequency-domain delay line, newest at `fdl_head`
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_head: usize,
    accum: Vec<Complex<f32>>,
    /// Input of the previous partition, played back as the delayed dry signal
    dry: Vec<f32>,
    wet_from: Vec<f32>,
    wet_to: Vec<f32>,
    pos: usize,
    /// IR id whose output is in `wet_to`
    rendered: Option<u64>,
    /// IR id most recently requested by the caller
    requested: Option<u64>,
    transition: Transition,
    wet_level: SmoothedValue,
}

impl PartitionedConvolver {
    pub(crate) fn new(
        block: usize,
        max_partitions: usize,
        wet_level: f32,
        smoothing_samples: usize,
    ) -> Self {
        let block = block.max(1);
        let max_partitions = max_partitions.max(1);
        let fft_size = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let zero = Complex::new(0.0, 0.0);

        Self {
            block,
            fft_size,
            max_partitions,
            fft,
            ifft,
            scratch: vec![zero; scratch_len],
            window: vec![0.0; fft_size],
            fdl: vec![vec![zero; fft_size]; max_partitions],
            fdl_head: 0,
            accum: vec![zero; fft_size],
            dry: vec![0.0; block],
            wet_from: vec![0.0; block],
            wet_to: vec![0.0; block],
            pos: 0,
            rendered: None,
            requested: None,
            transition: Transition::Steady,
            wet_level: SmoothedValue::new(wet_level, smoothing_samples),
        }
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block
    }

    pub(crate) fn max_partitions(&self) -> usize {
        self.max_partitions
    }

    /// True when `ir` was prepared for this convolver's geometry
    pub(crate) fn accepts(&self, ir: &PreparedIr) -> bool {
        ir.partition_size() == self.block && ir.num_partitions() <= self.max_partitions
    }

    pub(crate) fn set_wet_level(&mut self, level: f32) {
        self.wet_level.set_target(level);
    }

    pub(crate) fn wet_level(&self) -> f32 {
        self.wet_level.target()
    }

    /// Id of the IR currently producing output
    pub(crate) fn rendered(&self) -> Option<u64> {
        self.rendered
    }

    /// No crossfade running and the last request has taken effect
    pub(crate) fn is_settled(&self) -> bool {
        self.transition == Transition::Steady && self.rendered == self.requested
    }

    pub(crate) fn latency_samples(&self) -> usize {
        match (self.rendered, self.transition) {
            (None, Transition::Steady) => 0,
            _ => self.block,
        }
    }

    /// Process `block` in place
    ///
    /// `target` is the IR that should be active; `outgoing` must be the IR
    /// currently rendered when a switch is pending, and is only read at the
    /// partition boundary that starts the crossfade.
    pub(crate) fn process(
        &mut self,
        block: &mut [f32],
        target: Option<&PreparedIr>,
        outgoing: Option<&PreparedIr>,
    ) {
        self.requested = target.map(PreparedIr::id);

        for sample in block.iter_mut() {
            let x = *sample;
            let b = self.block;
            self.window[b + self.pos] = x;
            let w = self.wet_level.next_value();

            // Steady bypass leaves the sample untouched but still feeds the history
            if self.rendered.is_some() || self.transition != Transition::Steady {
                let dry = self.dry[self.pos];
                let to = match self.rendered {
                    Some(_) => dry * (1.0 - w) + self.wet_to[self.pos] * w,
                    None => x,
                };
                *sample = match self.transition {
                    Transition::Steady => to,
                    Transition::Fading { from } => {
                        let from = match from {
                            Some(_) => dry * (1.0 - w) + self.wet_from[self.pos] * w,
                            None => x,
                        };
                        let theta = FRAC_PI_2 * (self.pos + 1) as f32 / b as f32;
                        from * theta.cos() + to * theta.sin()
                    }
                };
            }

            self.pos += 1;
            if self.pos == b {
                self.pos = 0;
                self.boundary(target, outgoing);
            }
        }
    }

    fn boundary(&mut self, target: Option<&PreparedIr>, outgoing: Option<&PreparedIr>) {
        let b = self.block;
        self.dry.copy_from_slice(&self.window[b..]);

        // Push the newest 2B window into the delay line
        self.fdl_head = (self.fdl_head + 1) % self.max_partitions;
        let slot = &mut self.fdl[self.fdl_head];
        for (bin, &s) in slot.iter_mut().zip(self.window.iter()) {
            *bin = Complex::new(s, 0.0);
        }
        self.fft.process_with_scratch(slot, &mut self.scratch);
        self.window.copy_within(b.., 0);

        let target_id = target.map(PreparedIr::id);
        if target_id != self.rendered {
            let from = self.rendered;
            match outgoing.filter(|ir| Some(ir.id()) == from) {
                Some(ir) => {
                    Self::render(
                        ir,
                        &self.fdl,
                        self.fdl_head,
                        &mut self.accum,
                        &mut self.scratch,
                        &*self.ifft,
                        &mut self.wet_from,
                    );
                    self.transition = Transition::Fading { from };
                }
                // Outgoing IR unavailable: fade from bypass instead
                None => self.transition = Transition::Fading { from: None },
            }
            self.rendered = target_id;
        } else {
            self.transition = Transition::Steady;
        }

        match target {
            Some(ir) => Self::render(
                ir,
                &self.fdl,
                self.fdl_head,
                &mut self.accum,
                &mut self.scratch,
                &*self.ifft,
                &mut self.wet_to,
            ),
            None => self.wet_to.fill(0.0),
        }
    }

    /// Inverse transform of the delay line weighted by `ir`, last half only
    fn render(
        ir: &PreparedIr,
        fdl: &[Vec<Complex<f32>>],
        head: usize,
        accum: &mut [Complex<f32>],
        scratch: &mut [Complex<f32>],
        ifft: &dyn Fft<f32>,
        out: &mut [f32],
    ) {
        let slots = fdl.len();
        accum.fill(Complex::new(0.0, 0.0));
        for k in 0..ir.num_partitions().min(slots) {
            let x = &fdl[(head + slots - k) % slots];
            for ((acc, &xs), &hs) in accum.iter_mut().zip(x.iter()).zip(ir.partition(k)) {
                *acc += xs * hs;
            }
        }
        ifft.process_with_scratch(accum, scratch);

        let b = out.len();
        let scale = 1.0 / accum.len() as f32;
        for (o, c) in out.iter_mut().zip(&accum[b..]) {
            *o = c.re * scale;
        }
    }

    /// Clear all history; the rendered IR stays selected
    pub(crate) fn reset(&mut self) {
        let zero = Complex::new(0.0, 0.0);
        self.window.fill(0.0);
        self.fdl.iter_mut().for_each(|slot| slot.fill(zero));
        self.dry.fill(0.0);
        self.wet_from.fill(0.0);
        self.wet_to.fill(0.0);
        self.pos = 0;
        self.transition = Transition::Steady;
        self.wet_level.set_immediate(self.wet_level.target());
    }

    pub(crate) fn fft_size(&self) -> usize {
        self.fft_size
    }
}
