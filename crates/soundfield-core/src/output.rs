//! Output post-processing: lane remap and sample conversion
//!
//! After source mixing and effect processing, the dry lanes are remapped
//! through the device's channel assignment and converted to the output
//! sample width. Conversion is scale-and-clamp: 16-bit clamps
//! asymmetrically to `[-32768, 32767]`, 8-bit rides on that and rebases
//! to unsigned, float passes through untouched.

use crate::crossfeed::Crossfeed;
use crate::types::{OutputChannel, Sample, SampleType};

/// Sample types a device can emit. The backend hands `Device::mix` a
/// slice of one of these; it must match the device format's sample type.
pub trait OutputSample: Copy {
    const SAMPLE_TYPE: SampleType;

    fn from_mix(value: Sample) -> Self;
}

#[inline]
fn to_i16(value: Sample) -> i16 {
    if value < 0.0 {
        ((value * 32768.0) as i32).max(-32768) as i16
    } else {
        ((value * 32767.0) as i32).min(32767) as i16
    }
}

impl OutputSample for f32 {
    const SAMPLE_TYPE: SampleType = SampleType::F32;

    #[inline]
    fn from_mix(value: Sample) -> Self {
        value
    }
}

impl OutputSample for i16 {
    const SAMPLE_TYPE: SampleType = SampleType::I16;

    #[inline]
    fn from_mix(value: Sample) -> Self {
        to_i16(value)
    }
}

impl OutputSample for u8 {
    const SAMPLE_TYPE: SampleType = SampleType::U8;

    #[inline]
    fn from_mix(value: Sample) -> Self {
        ((to_i16(value) >> 8) + 128) as u8
    }
}

/// Remap and convert `frames` frames of dry mix into the output slice.
/// The crossfeed, when present, taps the two mapped stereo lanes before
/// conversion.
pub(crate) fn write_block<S: OutputSample>(
    out: &mut [S],
    dry: &[[Sample; crate::types::OUTPUT_CHANNELS]],
    order: &[OutputChannel],
    crossfeed: Option<&mut Crossfeed>,
    frames: usize,
) {
    let channels = order.len();

    if channels == 2 {
        if let Some(crossfeed) = crossfeed {
            for (i, frame) in dry[..frames].iter().enumerate() {
                let (left, right) =
                    crossfeed.process(frame[order[0] as usize], frame[order[1] as usize]);
                out[i * 2] = S::from_mix(left);
                out[i * 2 + 1] = S::from_mix(right);
            }
            return;
        }
    }

    for (i, frame) in dry[..frames].iter().enumerate() {
        for (c, &channel) in order.iter().enumerate() {
            out[i * channels + c] = S::from_mix(frame[channel as usize]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OUTPUT_CHANNELS;

    #[test]
    fn test_i16_clamp_is_asymmetric() {
        assert_eq!(i16::from_mix(0.0), 0);
        assert_eq!(i16::from_mix(1.0), 32767);
        assert_eq!(i16::from_mix(-1.0), -32768);
        assert_eq!(i16::from_mix(2.0), 32767);
        assert_eq!(i16::from_mix(-2.0), -32768);
    }

    #[test]
    fn test_u8_is_biased() {
        assert_eq!(u8::from_mix(0.0), 128);
        assert_eq!(u8::from_mix(1.0), 255);
        assert_eq!(u8::from_mix(-1.0), 0);
    }

    #[test]
    fn test_f32_passes_through_unclamped() {
        assert_eq!(f32::from_mix(1.75), 1.75);
        assert_eq!(f32::from_mix(-3.0), -3.0);
    }

    #[test]
    fn test_remap_follows_channel_order() {
        let mut dry = vec![[0.0f32; OUTPUT_CHANNELS]; 2];
        dry[0][OutputChannel::FrontLeft as usize] = 0.25;
        dry[0][OutputChannel::FrontRight as usize] = -0.5;
        dry[1][OutputChannel::FrontLeft as usize] = 1.0;

        let order = [OutputChannel::FrontLeft, OutputChannel::FrontRight];
        let mut out = [0.0f32; 4];
        write_block(&mut out, &dry, &order, None, 2);

        assert_eq!(out, [0.25, -0.5, 1.0, 0.0]);
    }

    #[test]
    fn test_mono_remap_reads_center_lane() {
        let mut dry = vec![[0.0f32; OUTPUT_CHANNELS]; 1];
        dry[0][OutputChannel::FrontCenter as usize] = 0.5;

        let order = [OutputChannel::FrontCenter];
        let mut out = [0i16; 1];
        write_block(&mut out, &dry, &order, None, 1);
        assert_eq!(out[0], 16383);
    }
}
