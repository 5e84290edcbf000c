//! One-pole low-pass filtering for the dry and wet signal paths
//!
//! Each source carries one low-pass per path whose coefficient is derived
//! from the target high-frequency gain. The same state is processed as a
//! chain of one, two or four identical poles depending on the path:
//! spatialized dry audio runs four poles, wet sends two, and multi-channel
//! paths drop to two/one pole per channel to keep per-sample cost flat.

use crate::types::{Sample, OUTPUT_CHANNELS};

/// History slots: two poles per possible channel lane, which also covers
/// the four slots the mono dry path uses at offset 0.
const HISTORY_LEN: usize = OUTPUT_CHANNELS * 2;

/// Derive the one-pole coefficient for a target high-frequency gain.
///
/// `cw` is `cos(2*pi*cutoff/sample_rate)`. Calculations follow the I3DL2
/// low-pass response; gains at or above unity disable the filter
/// (coefficient 0). Gains below 0.01 are floored there, as smaller values
/// push the coefficient towards 1 and flatten the signal entirely.
pub fn lp_coeff_calc(gain: f32, cw: f32) -> f32 {
    if gain < 0.9999 {
        let g = gain.max(0.01);
        (1.0 - g * cw - (2.0 * g * (1.0 - cw) - g * g * (1.0 - cw * cw)).sqrt()) / (1.0 - g)
    } else {
        0.0
    }
}

/// A bank of chained one-pole low-pass sections sharing one coefficient.
///
/// The history is indexed by `offset` so independent channels of the same
/// source reuse a single filter instance: channel `c` uses slots
/// `[2c, 2c+1]` for the two-pole form and slot `c` for the one-pole form.
#[derive(Debug, Clone)]
pub struct LowPass {
    pub coeff: f32,
    history: [Sample; HISTORY_LEN],
}

impl Default for LowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LowPass {
    pub fn new() -> Self {
        Self {
            coeff: 0.0,
            history: [0.0; HISTORY_LEN],
        }
    }

    #[inline]
    fn pole(&mut self, slot: usize, input: Sample) -> Sample {
        let output = input + (self.history[slot] - input) * self.coeff;
        self.history[slot] = output;
        output
    }

    /// Four chained poles starting at `offset`
    #[inline]
    pub fn process4(&mut self, offset: usize, input: Sample) -> Sample {
        let output = self.pole(offset, input);
        let output = self.pole(offset + 1, output);
        let output = self.pole(offset + 2, output);
        self.pole(offset + 3, output)
    }

    /// Two chained poles starting at `offset`
    #[inline]
    pub fn process2(&mut self, offset: usize, input: Sample) -> Sample {
        let output = self.pole(offset, input);
        self.pole(offset + 1, output)
    }

    /// A single pole at `offset`
    #[inline]
    pub fn process1(&mut self, offset: usize, input: Sample) -> Sample {
        self.pole(offset, input)
    }

    /// Clear filter history (coefficient is preserved)
    pub fn reset(&mut self) {
        self.history = [0.0; HISTORY_LEN];
    }
}
