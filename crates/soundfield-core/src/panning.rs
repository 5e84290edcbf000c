//! Panning and output geometry
//!
//! Built once per context (re)configuration: a channel-mix matrix routing
//! source channels onto the device's available lanes, and a 512-bucket
//! azimuth lookup table giving each bucket's per-lane gain for a point
//! source. Bucket gains use a constant-power pan law, so any azimuth
//! between two adjacent speakers satisfies `low^2 + high^2 == 1`.

use std::f32::consts::{FRAC_PI_2, PI};

use crate::config::EngineConfig;
use crate::types::{OutputChannel, SpeakerLayout, OUTPUT_CHANNELS};

/// Discretization of one quadrant of the azimuth circle
pub const QUADRANT_NUM: usize = 128;

/// Total azimuth buckets in the panning LUT
pub const LUT_NUM: usize = 4 * QUADRANT_NUM;

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Inverse of [`cart_to_lut_pos`]: bucket index to azimuth angle.
///
/// Deliberately not linear in `pos` - the forward mapping uses only a
/// ratio and a rounding, so this piecewise arctangent makes the pair
/// approximate inverses without ever computing a full `atan2`.
fn lut_pos_to_angle(pos: usize) -> f32 {
    let q = QUADRANT_NUM as f32;
    let p = pos as f32;
    if pos < QUADRANT_NUM {
        (p / (q - p)).atan()
    } else if pos < 2 * QUADRANT_NUM {
        FRAC_PI_2 + ((p - q) / (2.0 * q - p)).atan()
    } else if pos < 3 * QUADRANT_NUM {
        ((p - 2.0 * q) / (3.0 * q - p)).atan() - PI
    } else {
        ((p - 3.0 * q) / (4.0 * q - p)).atan() - FRAC_PI_2
    }
}

/// Map planar listener-space coordinates to an azimuth bucket.
///
/// `re` points forward, `im` right. Uses the |im|/(|re|+|im|) ratio per
/// quadrant instead of an arctangent; together with
/// [`lut_pos_to_angle`] the quantization error stays below one bucket.
pub fn cart_to_lut_pos(re: f32, im: f32) -> usize {
    let mut pos = 0isize;
    let denom = re.abs() + im.abs();
    if denom > 0.0 {
        pos = (QUADRANT_NUM as f32 * im.abs() / denom + 0.5) as isize;
    }

    if re < 0.0 {
        pos = 2 * QUADRANT_NUM as isize - pos;
    }
    if im < 0.0 {
        pos = LUT_NUM as isize - pos;
    }
    (pos as usize) % LUT_NUM
}

/// Physical output channel order a device emits for each layout
pub(crate) fn device_channel_order(layout: SpeakerLayout) -> &'static [OutputChannel] {
    use OutputChannel::*;
    match layout {
        SpeakerLayout::Mono => &[FrontCenter],
        SpeakerLayout::Stereo => &[FrontLeft, FrontRight],
        SpeakerLayout::Quad => &[FrontLeft, FrontRight, BackLeft, BackRight],
        SpeakerLayout::Surround51 => &[
            FrontLeft, FrontRight, BackLeft, BackRight, FrontCenter, Lfe,
        ],
        SpeakerLayout::Surround61 => &[
            FrontLeft, FrontRight, FrontCenter, Lfe, BackCenter, SideLeft, SideRight,
        ],
        SpeakerLayout::Surround71 => &[
            FrontLeft, FrontRight, BackLeft, BackRight, FrontCenter, Lfe, SideLeft, SideRight,
        ],
    }
}

/// Native channel order of a multi-channel source buffer, or `None` for
/// channel counts the mixer does not know how to place.
pub(crate) fn source_channel_map(channels: usize) -> Option<&'static [OutputChannel]> {
    use OutputChannel::*;
    match channels {
        2 => Some(&[FrontLeft, FrontRight]),
        4 => Some(&[FrontLeft, FrontRight, BackLeft, BackRight]),
        6 => Some(&[FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight]),
        7 => Some(&[
            FrontLeft, FrontRight, FrontCenter, Lfe, BackCenter, SideLeft, SideRight,
        ]),
        8 => Some(&[
            FrontLeft, FrontRight, FrontCenter, Lfe, BackLeft, BackRight, SideLeft, SideRight,
        ]),
        _ => None,
    }
}

/// Precomputed panning state for one context
pub(crate) struct Panning {
    /// Per-bucket, per-lane point-source gains
    pub lut: Vec<[f32; OUTPUT_CHANNELS]>,
    /// Routing of source channels onto output lanes
    pub matrix: [[f32; OUTPUT_CHANNELS]; OUTPUT_CHANNELS],
    /// Number of configured speakers
    pub num_chans: usize,
}

impl Panning {
    /// Build the matrix and LUT for a device layout, applying any
    /// configured speaker-angle overrides.
    pub fn new(layout: SpeakerLayout, config: &EngineConfig) -> Self {
        use OutputChannel::*;

        let mut matrix = [[0.0f32; OUTPUT_CHANNELS]; OUTPUT_CHANNELS];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        let mut set = |from: OutputChannel, to: OutputChannel, gain: f32| {
            matrix[from as usize][to as usize] = gain;
        };

        // Default speaker set per layout, plus routing of source channels
        // that have no speaker of their own.
        let (mut speakers, mut angles): (Vec<OutputChannel>, Vec<f32>) = match layout {
            SpeakerLayout::Mono => {
                set(FrontLeft, FrontCenter, SQRT_HALF);
                set(FrontRight, FrontCenter, SQRT_HALF);
                set(SideLeft, FrontCenter, SQRT_HALF);
                set(SideRight, FrontCenter, SQRT_HALF);
                set(BackLeft, FrontCenter, SQRT_HALF);
                set(BackRight, FrontCenter, SQRT_HALF);
                set(BackCenter, FrontCenter, 1.0);
                (vec![FrontCenter], vec![0.0])
            }
            SpeakerLayout::Stereo => {
                set(FrontCenter, FrontLeft, SQRT_HALF);
                set(FrontCenter, FrontRight, SQRT_HALF);
                set(SideLeft, FrontLeft, 1.0);
                set(SideRight, FrontRight, 1.0);
                set(BackLeft, FrontLeft, 1.0);
                set(BackRight, FrontRight, 1.0);
                set(BackCenter, FrontLeft, SQRT_HALF);
                set(BackCenter, FrontRight, SQRT_HALF);
                (vec![FrontLeft, FrontRight], vec![-90.0, 90.0])
            }
            SpeakerLayout::Quad => {
                set(FrontCenter, FrontLeft, SQRT_HALF);
                set(FrontCenter, FrontRight, SQRT_HALF);
                set(SideLeft, FrontLeft, SQRT_HALF);
                set(SideLeft, BackLeft, SQRT_HALF);
                set(SideRight, FrontRight, SQRT_HALF);
                set(SideRight, BackRight, SQRT_HALF);
                set(BackCenter, BackLeft, SQRT_HALF);
                set(BackCenter, BackRight, SQRT_HALF);
                (
                    vec![BackLeft, FrontLeft, FrontRight, BackRight],
                    vec![-135.0, -45.0, 45.0, 135.0],
                )
            }
            SpeakerLayout::Surround51 => {
                set(SideLeft, FrontLeft, SQRT_HALF);
                set(SideLeft, BackLeft, SQRT_HALF);
                set(SideRight, FrontRight, SQRT_HALF);
                set(SideRight, BackRight, SQRT_HALF);
                set(BackCenter, BackLeft, SQRT_HALF);
                set(BackCenter, BackRight, SQRT_HALF);
                (
                    vec![BackLeft, FrontLeft, FrontCenter, FrontRight, BackRight],
                    vec![-110.0, -30.0, 0.0, 30.0, 110.0],
                )
            }
            SpeakerLayout::Surround61 => {
                set(BackLeft, BackCenter, SQRT_HALF);
                set(BackLeft, SideLeft, SQRT_HALF);
                set(BackRight, BackCenter, SQRT_HALF);
                set(BackRight, SideRight, SQRT_HALF);
                (
                    vec![SideLeft, FrontLeft, FrontCenter, FrontRight, SideRight, BackCenter],
                    vec![-90.0, -30.0, 0.0, 30.0, 90.0, 180.0],
                )
            }
            SpeakerLayout::Surround71 => {
                set(BackCenter, BackLeft, SQRT_HALF);
                set(BackCenter, BackRight, SQRT_HALF);
                (
                    vec![
                        BackLeft, SideLeft, FrontLeft, FrontCenter, FrontRight, SideRight,
                        BackRight,
                    ],
                    vec![-150.0, -90.0, -30.0, 0.0, 30.0, 90.0, 150.0],
                )
            }
        };

        for angle in angles.iter_mut() {
            *angle = angle.to_radians();
        }

        if let Some(overrides) = config.layout_override(layout) {
            apply_speaker_overrides(overrides, &mut speakers, &mut angles);
        }

        let num_chans = speakers.len();
        let mut lut = vec![[0.0f32; OUTPUT_CHANNELS]; LUT_NUM];

        for (pos, bucket) in lut.iter_mut().enumerate() {
            if num_chans == 1 {
                bucket[speakers[0] as usize] = 1.0;
                continue;
            }

            let mut theta = lut_pos_to_angle(pos);

            // Bracket between two adjacent speakers, constant-power blend
            let mut bracketed = false;
            for s in 0..num_chans - 1 {
                if theta >= angles[s] && theta < angles[s + 1] {
                    let alpha = FRAC_PI_2 * (theta - angles[s]) / (angles[s + 1] - angles[s]);
                    bucket[speakers[s] as usize] = alpha.cos();
                    bucket[speakers[s + 1] as usize] = alpha.sin();
                    bracketed = true;
                    break;
                }
            }

            // Wraparound segment between the last and first speaker
            if !bracketed {
                let last = num_chans - 1;
                if theta < angles[0] {
                    theta += 2.0 * PI;
                }
                let alpha =
                    FRAC_PI_2 * (theta - angles[last]) / (2.0 * PI + angles[0] - angles[last]);
                bucket[speakers[last] as usize] = alpha.cos();
                bucket[speakers[0] as usize] = alpha.sin();
            }
        }

        Self { lut, matrix, num_chans }
    }
}

/// Parse a `speaker=angle_degrees` override list and re-sort the speakers
/// by their (possibly changed) angles.
fn apply_speaker_overrides(
    overrides: &str,
    speakers: &mut [OutputChannel],
    angles: &mut [f32],
) {
    for item in overrides.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let Some((name, value)) = item.split_once('=') else {
            log::warn!("speaker layout entry without '=': \"{}\"", item);
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        let Some(channel) = channel_from_name(name) else {
            log::warn!("unknown speaker name: \"{}\"", name);
            continue;
        };

        let Some(slot) = speakers.iter().position(|&s| s == channel) else {
            // Named speaker exists but is not part of this layout
            continue;
        };

        match value.parse::<i32>() {
            Ok(degrees) if (-180..=180).contains(&degrees) => {
                angles[slot] = (degrees as f32).to_radians();
            }
            _ => log::warn!("invalid angle for speaker \"{}\": {}", name, value),
        }
    }

    // Keep the speaker list sorted ascending by angle
    let mut order: Vec<usize> = (0..speakers.len()).collect();
    order.sort_by(|&a, &b| angles[a].total_cmp(&angles[b]));
    let sorted_speakers: Vec<OutputChannel> = order.iter().map(|&i| speakers[i]).collect();
    let sorted_angles: Vec<f32> = order.iter().map(|&i| angles[i]).collect();
    speakers.copy_from_slice(&sorted_speakers);
    angles.copy_from_slice(&sorted_angles);
}

fn channel_from_name(name: &str) -> Option<OutputChannel> {
    let channel = match name {
        "fl" | "front-left" => OutputChannel::FrontLeft,
        "fr" | "front-right" => OutputChannel::FrontRight,
        "fc" | "front-center" => OutputChannel::FrontCenter,
        "bl" | "back-left" => OutputChannel::BackLeft,
        "br" | "back-right" => OutputChannel::BackRight,
        "bc" | "back-center" => OutputChannel::BackCenter,
        "sl" | "side-left" => OutputChannel::SideLeft,
        "sr" | "side-right" => OutputChannel::SideRight,
        _ => return None,
    };
    Some(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_and_angle_are_inverses() {
        for &pos in &[0, 64, 127, 128, 200, 255, 256, 300, 383, 384, 450, 511] {
            let theta = lut_pos_to_angle(pos);
            // Forward direction is -z; re is the forward component
            let re = theta.cos();
            let im = theta.sin();
            let roundtrip = cart_to_lut_pos(re, im);
            let error = (roundtrip as isize - pos as isize).rem_euclid(LUT_NUM as isize);
            let error = error.min(LUT_NUM as isize - error);
            assert!(error <= 1, "pos {} -> theta {} -> pos {}", pos, theta, roundtrip);
        }
    }

    #[test]
    fn test_mono_layout_is_all_center() {
        let panning = Panning::new(SpeakerLayout::Mono, &EngineConfig::default());
        assert_eq!(panning.num_chans, 1);
        for bucket in &panning.lut {
            assert_eq!(bucket[OutputChannel::FrontCenter as usize], 1.0);
        }
    }

    #[test]
    fn test_stereo_pan_is_energy_preserving() {
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        for bucket in &panning.lut {
            let energy: f32 = bucket.iter().map(|g| g * g).sum();
            assert!((energy - 1.0).abs() < 1e-5, "bucket energy {}", energy);
        }
    }

    #[test]
    fn test_front_source_is_symmetric_on_stereo() {
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        // Straight ahead: re = 1 (forward), im = 0
        let pos = cart_to_lut_pos(1.0, 0.0);
        let bucket = &panning.lut[pos];
        let fl = bucket[OutputChannel::FrontLeft as usize];
        let fr = bucket[OutputChannel::FrontRight as usize];
        assert!((fl - fr).abs() < 1e-6);
        assert!((fl - SQRT_HALF).abs() < 1e-3);
    }

    #[test]
    fn test_quad_brackets_cover_circle() {
        let panning = Panning::new(SpeakerLayout::Quad, &EngineConfig::default());
        for bucket in &panning.lut {
            let energy: f32 = bucket.iter().map(|g| g * g).sum();
            assert!((energy - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_speaker_override_changes_angles() {
        let mut config = EngineConfig::default();
        config.layout_stereo = Some("fl=-30, fr=30".to_string());
        let panning = Panning::new(SpeakerLayout::Stereo, &config);

        // A source at -90 degrees now sits outside the speaker pair, in the
        // wraparound segment; the left speaker still dominates.
        let pos = cart_to_lut_pos(0.0, -1.0);
        let bucket = &panning.lut[pos];
        assert!(
            bucket[OutputChannel::FrontLeft as usize]
                > bucket[OutputChannel::FrontRight as usize]
        );
    }

    #[test]
    fn test_override_parser_ignores_junk() {
        let mut speakers = vec![OutputChannel::FrontLeft, OutputChannel::FrontRight];
        let mut angles = vec![-1.0f32, 1.0];
        apply_speaker_overrides("nonsense, xx=10, fr=999, fl=170", &mut speakers, &mut angles);

        // Only fl applied; the list is re-sorted, so fr (1.0 rad) comes first
        assert_eq!(speakers, vec![OutputChannel::FrontRight, OutputChannel::FrontLeft]);
        assert!((angles[1] - 170.0f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_device_channel_orders() {
        assert_eq!(device_channel_order(SpeakerLayout::Mono).len(), 1);
        assert_eq!(device_channel_order(SpeakerLayout::Surround51).len(), 6);
        assert_eq!(device_channel_order(SpeakerLayout::Surround71).len(), 8);
        assert_eq!(source_channel_map(3), None);
        assert_eq!(source_channel_map(6).unwrap().len(), 6);
    }
}
