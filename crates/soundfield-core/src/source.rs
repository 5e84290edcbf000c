//! Sources: positioned sound emitters
//!
//! A source owns its pose, gain and cone configuration, a queue of
//! refcounted buffer references, the fixed-point playback cursor, and the
//! retained mix parameters the calculator produces. Any property mutation
//! sets `needs_update`; the mixer recomputes parameters only for dirty
//! sources, decoupling the 3D math from the per-sample loop.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use basedrop::Shared;

use crate::arena::RawId;
use crate::buffer::{BufferId, SampleData};
use crate::effect::SlotId;
use crate::error::{Error, Result};
use crate::filter::LowPass;
use crate::types::{DistanceModel, PlayState, Resampler, Sample, Vec3, MAX_SENDS, OUTPUT_CHANNELS};

/// Handle to a source in a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub(crate) RawId);

/// Direct or send low-pass filter settings. The defaults are an identity
/// filter (no attenuation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Broadband gain
    pub gain: f32,
    /// Additional gain at high frequencies
    pub gain_hf: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { gain: 1.0, gain_hf: 1.0 }
    }
}

/// One auxiliary routing path from a source to an effect slot
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceSend {
    pub slot: Option<SlotId>,
    pub filter: FilterSettings,
}

/// Parameters computed by the calculator and consumed by the sample loop.
///
/// The filters live here so their history carries across blocks; the
/// calculator only rewrites coefficients.
#[derive(Clone)]
pub(crate) struct SourceParams {
    pub pitch: f32,
    pub dry_gains: [Sample; OUTPUT_CHANNELS],
    pub wet_gains: [Sample; MAX_SENDS],
    pub dry_filter: LowPass,
    pub wet_filters: [LowPass; MAX_SENDS],
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            dry_gains: [0.0; OUTPUT_CHANNELS],
            wet_gains: [0.0; MAX_SENDS],
            dry_filter: LowPass::new(),
            wet_filters: std::array::from_fn(|_| LowPass::new()),
        }
    }
}

/// Lock-free playback state for application threads.
///
/// The mixer stores position and state here after every block; readers use
/// relaxed loads since only visibility matters.
pub struct SourceAtomics {
    position: AtomicU64,
    state: AtomicU8,
}

impl SourceAtomics {
    fn new() -> Self {
        Self {
            position: AtomicU64::new(0),
            state: AtomicU8::new(0),
        }
    }

    /// Playback cursor in frames within the current buffer (lock-free)
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Current play state (lock-free)
    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            3 => PlayState::Stopped,
            _ => PlayState::Initial,
        }
    }
}

/// An entry in a source's buffer queue. Holds its own `Shared` handle so
/// the sample data outlives any arena bookkeeping.
pub(crate) struct QueueEntry {
    pub id: BufferId,
    pub data: Shared<SampleData>,
}

/// A positioned sound emitter
pub struct Source {
    // Pose
    pub(crate) position: Vec3,
    pub(crate) velocity: Vec3,
    pub(crate) direction: Vec3,
    pub(crate) head_relative: bool,

    // Gain and attenuation
    pub(crate) gain: f32,
    pub(crate) min_gain: f32,
    pub(crate) max_gain: f32,
    pub(crate) pitch: f32,
    pub(crate) ref_distance: f32,
    pub(crate) max_distance: f32,
    pub(crate) rolloff_factor: f32,
    pub(crate) room_rolloff_factor: f32,
    pub(crate) air_absorption_factor: f32,
    pub(crate) doppler_factor: f32,
    pub(crate) distance_model: DistanceModel,

    // Sound cone
    pub(crate) inner_angle: f32,
    pub(crate) outer_angle: f32,
    pub(crate) outer_gain: f32,
    pub(crate) outer_gain_hf: f32,

    // Filtering and sends
    pub(crate) direct_filter: FilterSettings,
    pub(crate) dry_gain_hf_auto: bool,
    pub(crate) wet_gain_auto: bool,
    pub(crate) wet_gain_hf_auto: bool,
    pub(crate) sends: [SourceSend; MAX_SENDS],

    // Playback
    pub(crate) resampler: Resampler,
    pub(crate) looping: bool,
    pub(crate) queue: Vec<QueueEntry>,
    pub(crate) buffers_played: usize,
    pub(crate) state: PlayState,
    pub(crate) position_frames: u32,
    /// Invariant: always in `[0, FRACTION_ONE)`
    pub(crate) position_fraction: u32,

    // Retained mix state
    pub(crate) params: SourceParams,
    pub(crate) dry_current: [Sample; OUTPUT_CHANNELS],
    pub(crate) wet_current: [Sample; MAX_SENDS],
    pub(crate) first_start: bool,
    pub(crate) needs_update: bool,

    atomics: Arc<SourceAtomics>,
}

impl Source {
    pub(crate) fn new(resampler: Resampler) -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            head_relative: false,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            pitch: 1.0,
            ref_distance: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
            room_rolloff_factor: 0.0,
            air_absorption_factor: 0.0,
            doppler_factor: 1.0,
            distance_model: DistanceModel::InverseDistanceClamped,
            inner_angle: 360.0,
            outer_angle: 360.0,
            outer_gain: 0.0,
            outer_gain_hf: 1.0,
            direct_filter: FilterSettings::default(),
            dry_gain_hf_auto: true,
            wet_gain_auto: true,
            wet_gain_hf_auto: true,
            sends: [SourceSend::default(); MAX_SENDS],
            resampler,
            looping: false,
            queue: Vec::new(),
            buffers_played: 0,
            state: PlayState::Initial,
            position_frames: 0,
            position_fraction: 0,
            params: SourceParams::default(),
            dry_current: [0.0; OUTPUT_CHANNELS],
            wet_current: [0.0; MAX_SENDS],
            first_start: true,
            needs_update: true,
            atomics: Arc::new(SourceAtomics::new()),
        }
    }

    /// Lock-free observation handle for application threads
    pub fn atomics(&self) -> Arc<SourceAtomics> {
        Arc::clone(&self.atomics)
    }

    #[inline]
    pub(crate) fn sync_atomics(&self) {
        self.atomics
            .position
            .store(self.position_frames as u64, Ordering::Relaxed);
        let state = match self.state {
            PlayState::Initial => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
            PlayState::Stopped => 3,
        };
        self.atomics.state.store(state, Ordering::Relaxed);
    }

    // --- Property setters (each marks the retained parameters dirty) ---

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.needs_update = true;
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
        self.needs_update = true;
    }

    /// Facing direction; the zero vector makes the source omnidirectional
    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction;
        self.needs_update = true;
    }

    /// Interpret the pose relative to the listener instead of world space
    pub fn set_head_relative(&mut self, head_relative: bool) {
        self.head_relative = head_relative;
        self.needs_update = true;
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        non_negative("gain", gain)?;
        self.gain = gain;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_min_gain(&mut self, min_gain: f32) -> Result<()> {
        non_negative("min_gain", min_gain)?;
        self.min_gain = min_gain;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_max_gain(&mut self, max_gain: f32) -> Result<()> {
        non_negative("max_gain", max_gain)?;
        self.max_gain = max_gain;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        if pitch <= 0.0 {
            return Err(Error::InvalidValue { name: "pitch", value: pitch });
        }
        self.pitch = pitch;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_ref_distance(&mut self, distance: f32) -> Result<()> {
        non_negative("ref_distance", distance)?;
        self.ref_distance = distance;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_max_distance(&mut self, distance: f32) -> Result<()> {
        non_negative("max_distance", distance)?;
        self.max_distance = distance;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_rolloff_factor(&mut self, factor: f32) -> Result<()> {
        non_negative("rolloff_factor", factor)?;
        self.rolloff_factor = factor;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_room_rolloff_factor(&mut self, factor: f32) -> Result<()> {
        non_negative("room_rolloff_factor", factor)?;
        self.room_rolloff_factor = factor;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_air_absorption_factor(&mut self, factor: f32) -> Result<()> {
        if !(0.0..=10.0).contains(&factor) {
            return Err(Error::InvalidValue { name: "air_absorption_factor", value: factor });
        }
        self.air_absorption_factor = factor;
        self.needs_update = true;
        Ok(())
    }

    /// Scales the context's doppler factor for this source alone
    pub fn set_doppler_factor(&mut self, factor: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(Error::InvalidValue { name: "doppler_factor", value: factor });
        }
        self.doppler_factor = factor;
        self.needs_update = true;
        Ok(())
    }

    /// Per-source distance model, honored when the context enables
    /// per-source models
    pub fn set_distance_model(&mut self, model: DistanceModel) {
        self.distance_model = model;
        self.needs_update = true;
    }

    pub fn set_cone_angles(&mut self, inner: f32, outer: f32) -> Result<()> {
        for (name, value) in [("inner_angle", inner), ("outer_angle", outer)] {
            if !(0.0..=360.0).contains(&value) {
                return Err(Error::InvalidValue { name, value });
            }
        }
        self.inner_angle = inner;
        self.outer_angle = outer;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_outer_gain(&mut self, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(Error::InvalidValue { name: "outer_gain", value: gain });
        }
        self.outer_gain = gain;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_outer_gain_hf(&mut self, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(Error::InvalidValue { name: "outer_gain_hf", value: gain });
        }
        self.outer_gain_hf = gain;
        self.needs_update = true;
        Ok(())
    }

    pub fn set_direct_filter(&mut self, filter: FilterSettings) -> Result<()> {
        non_negative("filter_gain", filter.gain)?;
        non_negative("filter_gain_hf", filter.gain_hf)?;
        self.direct_filter = filter;
        self.needs_update = true;
        Ok(())
    }

    /// Whether the cone's HF attenuation feeds the dry path
    pub fn set_dry_gain_hf_auto(&mut self, auto: bool) {
        self.dry_gain_hf_auto = auto;
        self.needs_update = true;
    }

    /// Whether cone/distance attenuation feeds the wet paths
    pub fn set_wet_gain_auto(&mut self, auto: bool) {
        self.wet_gain_auto = auto;
        self.needs_update = true;
    }

    /// Whether the cone's HF attenuation feeds the wet paths
    pub fn set_wet_gain_hf_auto(&mut self, auto: bool) {
        self.wet_gain_hf_auto = auto;
        self.needs_update = true;
    }

    pub fn set_resampler(&mut self, resampler: Resampler) {
        self.resampler = resampler;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    // --- Queries ---

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Frames into the current buffer plus the fractional phase
    pub fn playback_position(&self) -> (u32, u32) {
        (self.position_frames, self.position_fraction)
    }

    pub fn buffers_played(&self) -> usize {
        self.buffers_played
    }

    pub fn buffers_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn send(&self, index: usize) -> Option<&SourceSend> {
        self.sends.get(index)
    }

    /// Channel count and native rate of the queued audio
    pub(crate) fn queue_format(&self) -> Option<(usize, u32)> {
        self.queue
            .first()
            .map(|entry| (entry.data.channels(), entry.data.frequency()))
    }

    // --- Queue management (refcount bookkeeping happens at device level) ---

    pub(crate) fn push_queue_entry(&mut self, entry: QueueEntry) -> Result<()> {
        if let Some((channels, frequency)) = self.queue_format() {
            if entry.data.channels() != channels || entry.data.frequency() != frequency {
                return Err(Error::QueueFormatMismatch {
                    queued: channels,
                    queued_hz: frequency,
                    new: entry.data.channels(),
                    new_hz: entry.data.frequency(),
                });
            }
        }
        self.queue.push(entry);
        // The parameter path depends on the queued channel count
        self.needs_update = true;
        Ok(())
    }

    /// Remove fully-processed entries from the head of the queue
    pub(crate) fn take_processed(&mut self) -> Vec<QueueEntry> {
        let processed = self.buffers_played.min(self.queue.len());
        self.buffers_played -= processed;
        self.queue.drain(..processed).collect()
    }

    /// Remove every entry. Only legal while stopped or initial.
    pub(crate) fn take_queue(&mut self) -> Result<Vec<QueueEntry>> {
        match self.state {
            PlayState::Initial | PlayState::Stopped => {
                self.buffers_played = 0;
                self.position_frames = 0;
                self.position_fraction = 0;
                self.needs_update = true;
                Ok(self.queue.drain(..).collect())
            }
            state => Err(Error::QueueLocked { state }),
        }
    }

    // --- State transitions ---

    /// Begin or resume playback.
    ///
    /// A queue with no non-empty buffer degrades to an immediately-finished
    /// source: every buffer is marked played and the state is untouched.
    pub(crate) fn play(&mut self, connected: bool) {
        if !self.queue.iter().any(|entry| entry.data.frames() > 0) {
            self.buffers_played = self.queue.len();
            self.sync_atomics();
            return;
        }

        self.dry_current = [0.0; OUTPUT_CHANNELS];
        self.wet_current = [0.0; MAX_SENDS];

        if self.state != PlayState::Paused {
            self.state = PlayState::Playing;
            self.position_frames = 0;
            self.position_fraction = 0;
            self.buffers_played = 0;
        } else {
            self.state = PlayState::Playing;
        }

        // Only a start from the very beginning may skip gain ramping
        self.first_start = self.buffers_played == 0
            && self.position_frames == 0
            && self.position_fraction == 0;

        if !connected {
            self.state = PlayState::Stopped;
            self.buffers_played = self.queue.len();
            self.position_frames = 0;
            self.position_fraction = 0;
        }
        self.sync_atomics();
    }

    pub(crate) fn pause(&mut self) {
        if self.state == PlayState::Playing {
            self.state = PlayState::Paused;
        }
        self.sync_atomics();
    }

    pub(crate) fn stop(&mut self) {
        if self.state != PlayState::Initial {
            self.state = PlayState::Stopped;
            self.buffers_played = self.queue.len();
        }
        self.sync_atomics();
    }

    pub(crate) fn rewind(&mut self) {
        self.state = PlayState::Initial;
        self.position_frames = 0;
        self.position_fraction = 0;
        self.buffers_played = 0;
        self.first_start = true;
        self.sync_atomics();
    }

    /// Forced stop on device disconnection
    pub(crate) fn halt(&mut self) {
        if self.state == PlayState::Playing {
            self.state = PlayState::Stopped;
            self.buffers_played = self.queue.len();
            self.position_frames = 0;
            self.position_fraction = 0;
            self.sync_atomics();
        }
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<()> {
    if value < 0.0 {
        return Err(Error::InvalidValue { name, value });
    }
    Ok(())
}
