//! Per-source parameter calculation
//!
//! Runs only when a source is dirty, producing the retained parameters the
//! sample loop consumes: per-lane dry gains, per-send wet gains, the
//! doppler-shifted pitch, and the low-pass coefficients. Mono sources get
//! the full spatialization pipeline; multi-channel sources only get gain
//! clamps, filters and listener gain.

use std::collections::HashMap;
use std::f32::consts::PI;

use crate::arena::RawId;
use crate::effect::{EffectParams, SlotInfo};
use crate::filter::lp_coeff_calc;
use crate::listener::Listener;
use crate::panning::{cart_to_lut_pos, Panning};
use crate::source::Source;
use crate::types::{
    DistanceModel, Vec3, AIR_ABSORB_GAIN_DB_HF, LOWPASS_FREQ_CUTOFF, MAX_SENDS, OUTPUT_CHANNELS,
    SPEED_OF_SOUND_METRES_PER_SEC,
};

/// Everything the calculator reads besides the source itself. All borrows
/// are immutable so dirty sources can be recalculated in parallel.
pub(crate) struct CalcEnv<'a> {
    pub listener: &'a Listener,
    pub panning: &'a Panning,
    /// Snapshot of slot routing facts, keyed by raw slot id
    pub slot_info: &'a HashMap<RawId, SlotInfo>,
    pub distance_model: DistanceModel,
    pub source_distance_model: bool,
    pub doppler_factor: f32,
    pub doppler_velocity: f32,
    pub speed_of_sound: f32,
    pub frequency: u32,
    pub num_sends: usize,
    pub head_dampen: f32,
}

/// Non-attenuated path for multi-channel sources: gain clamps, filter
/// gains and listener gain only - no 3D positioning.
pub(crate) fn calc_non_attn_source_params(source: &mut Source, env: &CalcEnv) {
    let listener_gain = env.listener.gain;
    let mut wet_gain_hf = [1.0f32; MAX_SENDS];

    source.params.pitch = source.pitch;

    let mut dry_gain = source.gain.min(source.max_gain).max(source.min_gain);
    let mut dry_gain_hf = 1.0f32;
    dry_gain *= source.direct_filter.gain;
    dry_gain_hf *= source.direct_filter.gain_hf;

    source.params.dry_gains = [dry_gain * listener_gain; OUTPUT_CHANNELS];

    for i in 0..env.num_sends {
        let mut wet_gain = source.gain.min(source.max_gain).max(source.min_gain);
        wet_gain *= source.sends[i].filter.gain;
        wet_gain_hf[i] *= source.sends[i].filter.gain_hf;
        source.params.wet_gains[i] = wet_gain * listener_gain;
    }
    for i in env.num_sends..MAX_SENDS {
        source.params.wet_gains[i] = 0.0;
        wet_gain_hf[i] = 1.0;
    }

    let cw = (2.0 * PI * LOWPASS_FREQ_CUTOFF / env.frequency as f32).cos();

    // The dry path runs two chained one-pole filters, so the coefficient
    // wants the square root of the squared gain - the base gain itself.
    source.params.dry_filter.coeff = lp_coeff_calc(dry_gain_hf, cw);
    for i in 0..env.num_sends {
        // One pole on the wet path, so use the squared gain
        source.params.wet_filters[i].coeff = lp_coeff_calc(wet_gain_hf[i] * wet_gain_hf[i], cw);
    }
}

/// Full spatialization for mono sources.
pub(crate) fn calc_source_params(source: &mut Source, env: &CalcEnv) {
    let listener_gain = env.listener.gain;
    let meters_per_unit = env.listener.meters_per_unit;
    let mut wet_gain_hf = [1.0f32; MAX_SENDS];

    // 1. Transform the source pose into listener space
    let mut position = source.position;
    let mut direction = source.direction;
    let mut velocity = source.velocity;
    let listener_vel;
    if !source.head_relative {
        let n = env.listener.forward.normalized();
        let v = env.listener.up.normalized();
        let u = n.cross(v).normalized();
        let rotate = |vec: Vec3| Vec3::new(vec.dot(u), vec.dot(v), -vec.dot(n));

        position = rotate(position - env.listener.position);
        direction = rotate(direction);
        velocity = rotate(velocity);
        listener_vel = rotate(env.listener.velocity);
    } else {
        listener_vel = Vec3::ZERO;
    }

    let source_to_listener = (-position).normalized();
    let direction = direction.normalized();

    // 2. Distance attenuation
    let mut distance = position.length();
    let orig_dist = distance;
    let min_dist = source.ref_distance;
    let max_dist = source.max_distance;
    let rolloff = source.rolloff_factor;

    let mut attenuation = 1.0f32;
    let mut room_attenuation = [1.0f32; MAX_SENDS];
    let mut room_rolloff = [0.0f32; MAX_SENDS];
    for i in 0..env.num_sends {
        room_rolloff[i] = source.room_rolloff_factor;
        if let Some(id) = source.sends[i].slot {
            if let Some(info) = env.slot_info.get(&id.0) {
                if let EffectParams::Reverb(reverb) = info.params {
                    room_rolloff[i] += reverb.room_rolloff_factor;
                }
            }
        }
    }

    let model = if env.source_distance_model {
        source.distance_model
    } else {
        env.distance_model
    };

    let inverse = |distance: f32, att: &mut f32, rooms: &mut [f32; MAX_SENDS]| {
        if min_dist > 0.0 {
            if min_dist + rolloff * (distance - min_dist) > 0.0 {
                *att = min_dist / (min_dist + rolloff * (distance - min_dist));
            }
            for i in 0..env.num_sends {
                if min_dist + room_rolloff[i] * (distance - min_dist) > 0.0 {
                    rooms[i] = min_dist / (min_dist + room_rolloff[i] * (distance - min_dist));
                }
            }
        }
    };
    let linear = |distance: &mut f32, att: &mut f32, rooms: &mut [f32; MAX_SENDS]| {
        *distance = distance.min(max_dist);
        if max_dist != min_dist {
            *att = 1.0 - rolloff * (*distance - min_dist) / (max_dist - min_dist);
            for i in 0..env.num_sends {
                rooms[i] = 1.0 - room_rolloff[i] * (*distance - min_dist) / (max_dist - min_dist);
            }
        }
    };
    let exponent = |distance: f32, att: &mut f32, rooms: &mut [f32; MAX_SENDS]| {
        if distance > 0.0 && min_dist > 0.0 {
            *att = (distance / min_dist).powf(-rolloff);
            for i in 0..env.num_sends {
                rooms[i] = (distance / min_dist).powf(-room_rolloff[i]);
            }
        }
    };

    match model {
        DistanceModel::InverseDistanceClamped => {
            distance = distance.max(min_dist).min(max_dist);
            if max_dist >= min_dist {
                inverse(distance, &mut attenuation, &mut room_attenuation);
            }
        }
        DistanceModel::InverseDistance => {
            inverse(distance, &mut attenuation, &mut room_attenuation);
        }
        DistanceModel::LinearDistanceClamped => {
            distance = distance.max(min_dist).min(max_dist);
            if max_dist >= min_dist {
                linear(&mut distance, &mut attenuation, &mut room_attenuation);
            }
        }
        DistanceModel::LinearDistance => {
            linear(&mut distance, &mut attenuation, &mut room_attenuation);
        }
        DistanceModel::ExponentDistanceClamped => {
            distance = distance.max(min_dist).min(max_dist);
            if max_dist >= min_dist {
                exponent(distance, &mut attenuation, &mut room_attenuation);
            }
        }
        DistanceModel::ExponentDistance => {
            exponent(distance, &mut attenuation, &mut room_attenuation);
        }
        DistanceModel::None => {}
    }

    let mut dry_mix = source.gain * attenuation;
    let mut wet_gain = [0.0f32; MAX_SENDS];
    for i in 0..env.num_sends {
        wet_gain[i] = source.gain * room_attenuation[i];
    }

    // Distance the attenuation corresponds to, in metres past the
    // reference distance; drives air absorption and reverb decay.
    let mut effective_dist = 0.0;
    if min_dist > 0.0 {
        effective_dist = (min_dist / attenuation - min_dist) * meters_per_unit;
    }

    let mut dry_gain_hf = 1.0f32;
    if source.air_absorption_factor > 0.0 && effective_dist > 0.0 {
        // Absorption accumulates in dB, converted to linear at the end
        let absorb_db = source.air_absorption_factor * AIR_ABSORB_GAIN_DB_HF * effective_dist;
        dry_gain_hf *= 10.0f32.powf(absorb_db / 20.0);
    }

    // 3. Directional sound cone
    let angle = direction
        .dot(source_to_listener)
        .clamp(-1.0, 1.0)
        .acos()
        .to_degrees();
    let (cone_volume, mut cone_hf) = if angle >= source.inner_angle
        && angle <= source.outer_angle
        && source.outer_angle > source.inner_angle
    {
        let scale = (angle - source.inner_angle) / (source.outer_angle - source.inner_angle);
        (
            1.0 + (source.outer_gain - 1.0) * scale,
            1.0 + (source.outer_gain_hf - 1.0) * scale,
        )
    } else if angle > source.outer_angle {
        (source.outer_gain, source.outer_gain_hf)
    } else {
        (1.0, 1.0)
    };

    // Extra high-frequency dampening for sources behind the listener.
    // The angle off the straight-ahead axis only needs the z component of
    // the (unit) source-to-listener vector.
    let mut behind_angle = source_to_listener.z.clamp(-1.0, 1.0).acos().to_degrees();
    if orig_dist < min_dist {
        // Sources within the reference distance attenuate less
        behind_angle *= orig_dist / min_dist;
    }
    if behind_angle > 90.0 {
        // .1 on the divisor absorbs float error at the 180 degree edge
        let scale = (behind_angle - 90.0) / (180.1 - 90.0);
        cone_hf *= 1.0 - env.head_dampen * scale;
    }

    dry_mix *= cone_volume;
    if source.dry_gain_hf_auto {
        dry_gain_hf *= cone_hf;
    }

    // 4. Clamp to the source's gain bounds
    dry_mix = dry_mix.min(source.max_gain).max(source.min_gain);

    // 5. Wet path per send
    for i in 0..env.num_sends {
        let info = source.sends[i]
            .slot
            .and_then(|id| env.slot_info.get(&id.0));
        let Some(info) = info else {
            source.params.wet_gains[i] = 0.0;
            wet_gain_hf[i] = 1.0;
            continue;
        };
        if info.params == EffectParams::None {
            source.params.wet_gains[i] = 0.0;
            wet_gain_hf[i] = 1.0;
            continue;
        }

        if info.aux_send_auto {
            if source.wet_gain_auto {
                wet_gain[i] *= cone_volume;
            }
            if source.wet_gain_hf_auto {
                wet_gain_hf[i] *= cone_hf;
            }
            wet_gain[i] = wet_gain[i].min(source.max_gain).max(source.min_gain);

            if let EffectParams::Reverb(reverb) = info.params {
                // Initial reverb decay over the effective distance, and the
                // effect's own high-frequency air absorption
                wet_gain[i] *= 10.0f32.powf(
                    effective_dist / (SPEED_OF_SOUND_METRES_PER_SEC * reverb.decay_time) * -60.0
                        / 20.0,
                );
                wet_gain_hf[i] *= 10.0f32.powf(
                    reverb.air_absorption_gain_hf.log10()
                        * source.air_absorption_factor
                        * effective_dist,
                );
            }
        } else {
            // Send auto off: the wet path mirrors the dry path, sans filter
            wet_gain[i] = dry_mix;
            wet_gain_hf[i] = dry_gain_hf;
        }

        wet_gain[i] *= source.sends[i].filter.gain;
        wet_gain_hf[i] *= source.sends[i].filter.gain_hf;
        source.params.wet_gains[i] = wet_gain[i] * listener_gain;
    }
    for i in env.num_sends..MAX_SENDS {
        source.params.wet_gains[i] = 0.0;
        wet_gain_hf[i] = 1.0;
    }

    // 6. Direct filter and listener gain
    dry_mix *= source.direct_filter.gain;
    dry_gain_hf *= source.direct_filter.gain_hf;
    dry_mix *= listener_gain;

    // 7. Doppler shift, with closing velocities clamped short of the
    // speed-of-sound singularity
    let doppler_factor = env.doppler_factor * source.doppler_factor;
    if doppler_factor != 0.0 {
        let max_velocity = (env.doppler_velocity * env.speed_of_sound) / doppler_factor;

        let mut vss = velocity.dot(source_to_listener);
        if vss >= max_velocity {
            vss = max_velocity - 1.0;
        } else if vss <= -max_velocity {
            vss = -max_velocity + 1.0;
        }

        let mut vls = listener_vel.dot(source_to_listener);
        if vls >= max_velocity {
            vls = max_velocity - 1.0;
        } else if vls <= -max_velocity {
            vls = -max_velocity + 1.0;
        }

        source.params.pitch = source.pitch
            * ((env.speed_of_sound * env.doppler_velocity) - (doppler_factor * vls))
            / ((env.speed_of_sound * env.doppler_velocity) - (doppler_factor * vss));
    } else {
        source.params.pitch = source.pitch;
    }

    // 8. Per-lane gains: LUT panning blended with an ambient term that
    // grows as the source closes in on the listener
    let length = orig_dist.max(min_dist);
    let mut pan_pos = position;
    if length > 0.0 {
        pan_pos = pan_pos * (1.0 / length);
    }

    let lut_idx = cart_to_lut_pos(-pan_pos.z, pan_pos.x);
    let speaker_gain = &env.panning.lut[lut_idx];

    let dir_gain = (pan_pos.x * pan_pos.x + pan_pos.z * pan_pos.z).sqrt();
    let ambient_gain = 1.0 / (env.panning.num_chans as f32).sqrt() * (1.0 - dir_gain);
    for s in 0..OUTPUT_CHANNELS {
        let gain = speaker_gain[s] * dir_gain + ambient_gain;
        source.params.dry_gains[s] = dry_mix * gain;
    }

    // 9. Filter coefficients. The spatialized dry path chains four
    // one-pole filters, so it takes the fourth root of the squared gain -
    // the square root of the base gain; the wet path chains two, taking
    // the base gain.
    let cw = (2.0 * PI * LOWPASS_FREQ_CUTOFF / env.frequency as f32).cos();
    source.params.dry_filter.coeff = lp_coeff_calc(dry_gain_hf.sqrt(), cw);
    for i in 0..env.num_sends {
        source.params.wet_filters[i].coeff = lp_coeff_calc(wet_gain_hf[i], cw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{OutputChannel, Resampler, SpeakerLayout};

    fn stereo_env<'a>(
        listener: &'a Listener,
        panning: &'a Panning,
        slot_info: &'a HashMap<RawId, SlotInfo>,
    ) -> CalcEnv<'a> {
        CalcEnv {
            listener,
            panning,
            slot_info,
            distance_model: DistanceModel::InverseDistanceClamped,
            source_distance_model: false,
            doppler_factor: 1.0,
            doppler_velocity: 1.0,
            speed_of_sound: SPEED_OF_SOUND_METRES_PER_SEC,
            frequency: 44100,
            num_sends: 0,
            head_dampen: 0.0,
        }
    }

    fn dry_total(source: &Source) -> f32 {
        source.params.dry_gains.iter().sum()
    }

    #[test]
    fn test_source_at_ref_distance_keeps_volume() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_position(Vec3::new(0.0, 0.0, -1.0));
        source.set_gain(0.75).unwrap();
        source.set_rolloff_factor(1.0).unwrap();
        calc_source_params(&mut source, &env);

        // On-axis at the reference distance: no attenuation, symmetric pan
        let fl = source.params.dry_gains[OutputChannel::FrontLeft as usize];
        let fr = source.params.dry_gains[OutputChannel::FrontRight as usize];
        assert!((fl - fr).abs() < 1e-6);

        // Unit direction: the pan gains are pure LUT values, which square-sum
        // to one; the total energy across lanes equals the source volume.
        let energy: f32 = source
            .params
            .dry_gains
            .iter()
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt();
        assert!((energy - 0.75).abs() < 1e-3, "energy {}", energy);
    }

    #[test]
    fn test_inverse_attenuation_monotonic() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_ref_distance(1.0).unwrap();
        source.set_max_distance(100.0).unwrap();
        source.set_rolloff_factor(1.0).unwrap();

        let mut previous = f32::MAX;
        for step in 1..=100 {
            source.set_position(Vec3::new(0.0, 0.0, -(step as f32)));
            calc_source_params(&mut source, &env);
            let total = dry_total(&source);
            assert!(total <= previous + 1e-6, "attenuation rose at {}", step);
            previous = total;
        }
    }

    #[test]
    fn test_linear_attenuation_monotonic() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let mut env = stereo_env(&listener, &panning, &slots);
        env.distance_model = DistanceModel::LinearDistance;

        let mut source = Source::new(Resampler::Linear);
        source.set_ref_distance(1.0).unwrap();
        source.set_max_distance(50.0).unwrap();
        source.set_rolloff_factor(1.0).unwrap();

        let mut previous = f32::MAX;
        for step in 1..=50 {
            source.set_position(Vec3::new(0.0, 0.0, -(step as f32)));
            calc_source_params(&mut source, &env);
            let total = dry_total(&source);
            assert!(total <= previous + 1e-6);
            previous = total;
        }
    }

    #[test]
    fn test_clamped_model_with_inverted_range_skips_attenuation() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_ref_distance(10.0).unwrap();
        source.set_max_distance(1.0).unwrap();
        source.set_position(Vec3::new(0.0, 0.0, -500.0));
        calc_source_params(&mut source, &env);

        // max < ref: attenuation is skipped entirely, only panning applies
        let energy: f32 = source
            .params
            .dry_gains
            .iter()
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt();
        assert!((energy - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_gain_stays_within_bounds() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_min_gain(0.2).unwrap();
        source.set_max_gain(0.6).unwrap();
        source.set_gain(4.0).unwrap();

        // At unit distance the pan direction has unit length, so the lane
        // energies reconstruct the clamped mix exactly.
        let energy = |source: &Source| -> f32 {
            source
                .params
                .dry_gains
                .iter()
                .map(|g| g * g)
                .sum::<f32>()
                .sqrt()
        };

        // Far away: distance attenuation would push well below min_gain
        source.set_position(Vec3::new(0.0, 0.0, -10_000.0));
        calc_source_params(&mut source, &env);
        assert!((energy(&source) - 0.2).abs() < 1e-4);

        // At the reference distance: raw gain 4.0 would exceed max_gain
        source.set_position(Vec3::new(0.0, 0.0, -1.0));
        calc_source_params(&mut source, &env);
        assert!((energy(&source) - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_doppler_clamps_at_speed_of_sound() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_position(Vec3::new(0.0, 0.0, -10.0));
        // Closing velocity exactly at the clamp limit
        let limit = env.doppler_velocity * env.speed_of_sound / env.doppler_factor;
        source.set_velocity(Vec3::new(0.0, 0.0, -(limit * 2.0)));
        calc_source_params(&mut source, &env);

        let pitch = source.params.pitch;
        assert!(pitch.is_finite());
        assert!(pitch > 0.0);
    }

    #[test]
    fn test_receding_source_drops_pitch() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_position(Vec3::new(0.0, 0.0, -10.0));
        // Moving away from the listener along -z
        source.set_velocity(Vec3::new(0.0, 0.0, -50.0));
        calc_source_params(&mut source, &env);
        assert!(source.params.pitch < 1.0);

        // Approaching instead
        source.set_velocity(Vec3::new(0.0, 0.0, 50.0));
        calc_source_params(&mut source, &env);
        assert!(source.params.pitch > 1.0);
    }

    #[test]
    fn test_non_attn_path_ignores_position() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_gain(0.5).unwrap();
        source.set_position(Vec3::new(0.0, 0.0, -1000.0));
        calc_non_attn_source_params(&mut source, &env);

        for &gain in &source.params.dry_gains {
            assert!((gain - 0.5).abs() < 1e-6);
        }
        assert_eq!(source.params.pitch, 1.0);
    }

    #[test]
    fn test_cone_attenuates_off_axis_source() {
        let listener = Listener::default();
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_position(Vec3::new(0.0, 0.0, -1.0));
        source.set_cone_angles(30.0, 90.0).unwrap();
        source.set_outer_gain(0.25).unwrap();

        // Facing the listener: inside the inner cone
        source.set_direction(Vec3::new(0.0, 0.0, 1.0));
        calc_source_params(&mut source, &env);
        let facing = dry_total(&source);

        // Facing away: outside the outer cone
        source.set_direction(Vec3::new(0.0, 0.0, -1.0));
        calc_source_params(&mut source, &env);
        let away = dry_total(&source);

        assert!(away < facing);
        assert!((away / facing - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_head_relative_skips_listener_transform() {
        let mut listener = Listener::default();
        listener.position = Vec3::new(100.0, 0.0, 50.0);
        let panning = Panning::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let slots = HashMap::new();
        let env = stereo_env(&listener, &panning, &slots);

        let mut source = Source::new(Resampler::Linear);
        source.set_head_relative(true);
        source.set_position(Vec3::new(0.0, 0.0, -1.0));
        calc_source_params(&mut source, &env);

        // Pose is already listener-relative: dead ahead, no attenuation
        let fl = source.params.dry_gains[OutputChannel::FrontLeft as usize];
        let fr = source.params.dry_gains[OutputChannel::FrontRight as usize];
        assert!((fl - fr).abs() < 1e-6);
        assert!(fl > 0.5);
    }
}
