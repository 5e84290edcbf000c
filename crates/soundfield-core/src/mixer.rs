//! The sample mixer: resample, ramp, filter and accumulate
//!
//! Once per block, every playing source is resampled from its queue at the
//! computed pitch, run through its low-pass chains, scaled by linearly
//! ramped gains and summed into the shared dry lanes and its sends' wet
//! buffers. The loop works in 18.14 fixed point: the fractional phase
//! stays in `[0, FRACTION_ONE)` and the per-output-frame step is the
//! pitch-scaled frequency ratio.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::arena::{Arena, RawId};
use crate::context::Context;
use crate::effect::{EffectSlot, SlotInfo};
use crate::params::{calc_non_attn_source_params, calc_source_params, CalcEnv};
use crate::panning::source_channel_map;
use crate::source::Source;
use crate::types::{
    PlayState, Resampler, Sample, BUFFER_PADDING, FRACTION_BITS, FRACTION_MASK, FRACTION_ONE,
    MAX_PITCH, MAX_SENDS, MAX_SOURCE_CHANNELS, MIN_RAMP_LENGTH_MS, OUTPUT_CHANNELS,
};

/// Interpolation lookahead scratch: `BUFFER_PADDING` frames of every
/// possible channel
type Padding = [Sample; MAX_SOURCE_CHANNELS * BUFFER_PADDING];

/// Recompute parameters for every dirty source in the context.
///
/// Pure per-source math over shared context state, so dirty sources are
/// swept in parallel.
pub(crate) fn update_dirty_params(
    ctx: &mut Context,
    frequency: u32,
    num_sends: usize,
    head_dampen: f32,
) {
    let slot_info: HashMap<RawId, SlotInfo> = ctx
        .slots
        .ids()
        .filter_map(|id| ctx.slots.get(id).map(|slot| (id, slot.info())))
        .collect();

    let Context {
        sources,
        listener,
        panning,
        distance_model,
        source_distance_model,
        doppler_factor,
        doppler_velocity,
        speed_of_sound,
        ..
    } = ctx;

    let env = CalcEnv {
        listener,
        panning,
        slot_info: &slot_info,
        distance_model: *distance_model,
        source_distance_model: *source_distance_model,
        doppler_factor: *doppler_factor,
        doppler_velocity: *doppler_velocity,
        speed_of_sound: *speed_of_sound,
        frequency,
        num_sends,
        head_dampen,
    };

    sources.par_iter_mut().for_each(|source| {
        if !source.needs_update {
            return;
        }
        // Only mono buffers are spatialized
        match source.queue_format() {
            Some((1, _)) => calc_source_params(source, &env),
            _ => calc_non_attn_source_params(source, &env),
        }
        source.needs_update = false;
    });
}

/// Mix every playing source of the context into the dry lanes and the
/// slots' wet buffers.
pub(crate) fn mix_context(
    ctx: &mut Context,
    dry: &mut [[Sample; OUTPUT_CHANNELS]],
    wet_scratch: &mut [Vec<Sample>],
    samples_to_do: usize,
    device_frequency: u32,
    num_sends: usize,
) {
    // Ramps run at least MIN_RAMP_LENGTH_MS and at least one full block
    let ramp_length =
        ((device_frequency * MIN_RAMP_LENGTH_MS / 1000) as usize).max(samples_to_do);

    let Context { sources, slots, panning, .. } = ctx;

    for source in sources.iter_mut() {
        if source.state != PlayState::Playing {
            continue;
        }
        mix_source(
            source,
            slots,
            &panning.matrix,
            dry,
            wet_scratch,
            samples_to_do,
            device_frequency,
            num_sends,
            ramp_length,
        );
    }
}

/// Run each effect slot over its accumulated wet input, adding the effect
/// output into the dry lanes, then clear the wet buffer for the next block.
pub(crate) fn process_effect_slots(
    ctx: &mut Context,
    dry: &mut [[Sample; OUTPUT_CHANNELS]],
    samples_to_do: usize,
) {
    for slot in ctx.slots.iter_mut() {
        slot.run(samples_to_do, dry);
    }
}

/// Two-tap interpolation at the fractional phase
#[inline]
fn interpolate(resampler: Resampler, s0: Sample, s1: Sample, frac: u32) -> Sample {
    match resampler {
        Resampler::Point => s0,
        Resampler::Linear => s0 + (s1 - s0) * (frac as f32 * (1.0 / FRACTION_ONE as f32)),
        Resampler::Cosine => {
            let mult = (1.0
                - (frac as f32 * (1.0 / FRACTION_ONE as f32) * std::f32::consts::PI).cos())
                * 0.5;
            s0 + (s1 - s0) * mult
        }
    }
}

/// Read a sample, spilling into the padding copied from the next buffer
#[inline]
fn sample_at(samples: &[Sample], pad: &Padding, idx: usize) -> Sample {
    if idx < samples.len() {
        samples[idx]
    } else {
        pad[idx - samples.len()]
    }
}

/// Lookahead frames for the last samples of the current buffer: the head
/// of the next queued buffer, the queue head when looping at the tail, or
/// silence.
fn build_padding(
    queue: &[crate::source::QueueEntry],
    queue_idx: usize,
    looping: bool,
    channels: usize,
) -> Padding {
    let mut pad: Padding = [0.0; MAX_SOURCE_CHANNELS * BUFFER_PADDING];

    let next = if queue_idx + 1 < queue.len() {
        Some(&queue[queue_idx + 1].data)
    } else if looping {
        queue.first().map(|entry| &entry.data)
    } else {
        None
    };

    if let Some(next) = next {
        let samples = next.samples();
        let take = samples.len().min(channels * BUFFER_PADDING);
        pad[..take].copy_from_slice(&samples[..take]);
    }
    pad
}

#[allow(clippy::too_many_arguments)]
fn mix_source(
    source: &mut Source,
    slots: &mut Arena<EffectSlot>,
    matrix: &[[Sample; OUTPUT_CHANNELS]; OUTPUT_CHANNELS],
    dry: &mut [[Sample; OUTPUT_CHANNELS]],
    wet_scratch: &mut [Vec<Sample>],
    samples_to_do: usize,
    device_frequency: u32,
    num_sends: usize,
    ramp_length: usize,
) {
    let Some((channels, frequency)) = source.queue_format() else {
        // Nothing queued; degrade to a finished source
        source.state = PlayState::Stopped;
        source.sync_atomics();
        return;
    };

    for scratch in wet_scratch[..num_sends].iter_mut() {
        scratch[..samples_to_do].fill(0.0);
    }

    let resampler = source.resampler;
    let looping = source.looping;
    let mut state = source.state;
    let mut buffers_played = source.buffers_played;
    let mut queue_idx = buffers_played;
    let mut pos = source.position_frames as usize;
    let mut frac = source.position_fraction;

    // 18.14 fixed-point step per output frame
    let pitch = ((source.params.pitch * frequency as f32) / device_frequency as f32)
        .min(MAX_PITCH);
    let mut increment = (pitch * FRACTION_ONE as f32) as i64;
    if increment <= 0 {
        increment = FRACTION_ONE as i64;
    }
    let increment = increment as u64;

    // A source starting from silence jumps straight to its targets; there
    // is no previous audio to click against.
    let (mut dry_send, mut wet_send) = if source.first_start {
        (source.params.dry_gains, source.params.wet_gains)
    } else {
        (source.dry_current, source.wet_current)
    };

    let mut j = 0usize;

    while state == PlayState::Playing && j < samples_to_do {
        let Some(entry) = source.queue.get(queue_idx) else {
            state = PlayState::Stopped;
            buffers_played = source.queue.len();
            pos = 0;
            frac = 0;
            break;
        };
        let data_frames = entry.data.frames();

        if pos < data_frames {
            let pad = build_padding(&source.queue, queue_idx, looping, channels);

            // Per-frame steps toward the current targets
            let mut dry_step = [0.0f32; OUTPUT_CHANNELS];
            for i in 0..OUTPUT_CHANNELS {
                dry_step[i] = (source.params.dry_gains[i] - dry_send[i]) / ramp_length as f32;
            }
            let mut wet_step = [0.0f32; MAX_SENDS];
            for i in 0..num_sends {
                wet_step[i] = (source.params.wet_gains[i] - wet_send[i]) / ramp_length as f32;
            }

            // Frames mixable before the cursor crosses this buffer's end
            let data_size64 = (data_frames as u64) << FRACTION_BITS;
            let data_pos64 = ((pos as u64) << FRACTION_BITS) + frac as u64;
            let span = ((data_size64 - data_pos64 + (increment - 1)) / increment) as usize;
            let span = span.min(samples_to_do - j);

            let samples = entry.data.samples();
            let base = pos * channels;
            let mut k = 0usize;

            if channels == 1 {
                for _ in 0..span {
                    for i in 0..OUTPUT_CHANNELS {
                        dry_send[i] += dry_step[i];
                    }
                    for i in 0..num_sends {
                        wet_send[i] += wet_step[i];
                    }

                    let s0 = sample_at(samples, &pad, base + k);
                    let s1 = sample_at(samples, &pad, base + k + 1);
                    let value = interpolate(resampler, s0, s1, frac);

                    let out = source.params.dry_filter.process4(0, value);
                    let frame = &mut dry[j];
                    for s in 0..OUTPUT_CHANNELS {
                        frame[s] += out * dry_send[s];
                    }

                    for send in 0..num_sends {
                        let wet = source.params.wet_filters[send].process2(0, value);
                        wet_scratch[send][j] += wet * wet_send[send];
                    }

                    frac += increment as u32;
                    k += (frac >> FRACTION_BITS) as usize;
                    frac &= FRACTION_MASK;
                    j += 1;
                }
            } else if let Some(chans) = source_channel_map(channels) {
                let scaler = (1.0 / channels as f32).sqrt();
                for _ in 0..span {
                    for i in 0..OUTPUT_CHANNELS {
                        dry_send[i] += dry_step[i];
                    }
                    for i in 0..num_sends {
                        wet_send[i] += wet_step[i];
                    }

                    for (i, &ch) in chans.iter().enumerate() {
                        let lane = ch as usize;
                        let s0 = sample_at(samples, &pad, base + k * channels + i);
                        let s1 = sample_at(samples, &pad, base + (k + 1) * channels + i);
                        let value = interpolate(resampler, s0, s1, frac);

                        // Native channels route through the channel matrix
                        let out =
                            source.params.dry_filter.process2(lane * 2, value) * dry_send[lane];
                        let frame = &mut dry[j];
                        let row = &matrix[lane];
                        for out_ch in 0..OUTPUT_CHANNELS {
                            frame[out_ch] += out * row[out_ch];
                        }

                        for send in 0..num_sends {
                            let wet = source.params.wet_filters[send].process1(lane, value);
                            wet_scratch[send][j] += wet * wet_send[send] * scaler;
                        }
                    }

                    frac += increment as u32;
                    k += (frac >> FRACTION_BITS) as usize;
                    frac &= FRACTION_MASK;
                    j += 1;
                }
            } else {
                // Unknown channel count: keep the cursor and ramps moving,
                // mix nothing
                for i in 0..OUTPUT_CHANNELS {
                    dry_send[i] += dry_step[i] * span as f32;
                }
                for i in 0..num_sends {
                    wet_send[i] += wet_step[i] * span as f32;
                }
                let total = frac as u64 + increment * span as u64;
                k = (total >> FRACTION_BITS) as usize;
                frac = (total as u32) & FRACTION_MASK;
                j += span;
            }

            pos += k;
        }

        // Queue boundary: next buffer, loop wrap, or exhaustion
        if pos >= data_frames {
            if buffers_played < source.queue.len() - 1 {
                queue_idx += 1;
                buffers_played += 1;
                pos -= data_frames;
            } else if looping {
                queue_idx = 0;
                buffers_played = 0;
                if source.queue.len() == 1 {
                    pos = if data_frames > 0 { pos % data_frames } else { 0 };
                } else {
                    pos -= data_frames;
                }
            } else {
                state = PlayState::Stopped;
                queue_idx = 0;
                buffers_played = source.queue.len();
                pos = 0;
                frac = 0;
            }
        }
    }

    source.state = state;
    source.buffers_played = buffers_played;
    source.position_frames = pos as u32;
    source.position_fraction = frac;
    source.dry_current = dry_send;
    source.wet_current = wet_send;
    source.first_start = false;
    source.sync_atomics();

    // Flush the per-source wet accumulation into the target slots
    for send in 0..num_sends {
        let Some(slot_id) = source.sends[send].slot else {
            continue;
        };
        let Some(slot) = slots.get_mut(slot_id.0) else {
            continue;
        };
        let wet = slot.wet_mut();
        for (dst, src_sample) in wet[..samples_to_do]
            .iter_mut()
            .zip(&wet_scratch[send][..samples_to_do])
        {
            *dst += *src_sample;
        }
    }
}
