//! Stereo crossfeed post-filter
//!
//! Headphone listening puts each ear in its own acoustic world; speakers
//! bleed low frequencies across. This filter restores that bleed on true
//! stereo output: each channel receives a low-passed, attenuated copy of
//! the other, and the sum is normalized so overall loudness is unchanged.
//!
//! Applied after effect processing, before sample conversion, and only
//! when the device format is stereo.

use crate::types::Sample;

/// Preset table indexed by `crossfeed_level` 1..=3:
/// (lowpass cutoff in Hz, feed gain in dB). Higher levels feed more
/// signal across at a similar cutoff, approaching a narrower stage.
const LEVELS: [(f32, f32); 3] = [(700.0, -9.5), (700.0, -6.0), (650.0, -4.5)];

/// One-pole crossfeed state for a stereo pair.
pub(crate) struct Crossfeed {
    feed: f32,
    norm: f32,
    coeff: f32,
    lp_left: Sample,
    lp_right: Sample,
}

impl Crossfeed {
    /// Build from a config level (1..=3; out-of-range clamps to 3).
    pub fn new(level: u8, sample_rate: u32) -> Self {
        let (cutoff, feed_db) = LEVELS[(level.clamp(1, 3) - 1) as usize];
        let feed = 10.0f32.powf(feed_db / 20.0);
        let coeff = 1.0
            - (-2.0 * std::f32::consts::PI * cutoff / sample_rate as f32).exp();
        Self {
            feed,
            norm: 1.0 / (1.0 + feed),
            coeff,
            lp_left: 0.0,
            lp_right: 0.0,
        }
    }

    /// Cross-blend one stereo frame.
    #[inline]
    pub fn process(&mut self, left: Sample, right: Sample) -> (Sample, Sample) {
        self.lp_left += self.coeff * (left - self.lp_left);
        self.lp_right += self.coeff * (right - self.lp_right);
        (
            (left + self.lp_right * self.feed) * self.norm,
            (right + self.lp_left * self.feed) * self.norm,
        )
    }
}
