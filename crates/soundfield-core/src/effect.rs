//! Auxiliary effect slots
//!
//! A slot owns one polymorphic effect state and a per-block wet
//! accumulation buffer. Sources route audio into the wet buffer through
//! their sends; once per block the mixer hands the accumulated wet signal
//! to the effect, which adds its output directly into the dry lanes.

use crate::arena::RawId;
use crate::types::{Sample, BLOCK_SIZE, OUTPUT_CHANNELS};

/// Device facts an effect may need to (re)derive its internal state
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub frequency: u32,
    pub num_aux_sends: usize,
}

/// Reverb parameters that shape the wet path even before the effect runs:
/// the per-source wet gain derivation applies a decay-time falloff and an
/// HF absorption term from these.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParams {
    pub gain: f32,
    /// Decay time in seconds
    pub decay_time: f32,
    /// Per-metre high-frequency gain of the simulated air
    pub air_absorption_gain_hf: f32,
    /// Added to each routed source's room rolloff factor
    pub room_rolloff_factor: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            gain: 0.32,
            decay_time: 1.49,
            air_absorption_gain_hf: 0.994,
            room_rolloff_factor: 0.0,
        }
    }
}

/// Parameter block describing the effect loaded into a slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EffectParams {
    /// Pass-through; the slot contributes nothing to the wet derivation
    #[default]
    None,
    Reverb(ReverbParams),
}

/// Polymorphic effect processor.
///
/// Implementations are driven by the mixer: `device_update` on device
/// binding, `update` on parameter changes, and `process` exactly once per
/// slot per block. Destruction is `Drop`.
pub trait EffectState: Send {
    /// The slot was (re)bound to a device; derive rate-dependent state.
    fn device_update(&mut self, device: &DeviceInfo);

    /// The slot's effect parameters changed.
    fn update(&mut self, params: &EffectParams);

    /// Consume `samples` frames of accumulated wet input and add the
    /// effect output into the dry lanes.
    fn process(
        &mut self,
        samples: usize,
        wet_in: &[Sample],
        slot_gain: f32,
        dry_out: &mut [[Sample; OUTPUT_CHANNELS]],
    );
}

/// The default effect: consumes the wet buffer and emits nothing.
pub struct NullEffect;

impl EffectState for NullEffect {
    fn device_update(&mut self, _device: &DeviceInfo) {}

    fn update(&mut self, _params: &EffectParams) {}

    fn process(
        &mut self,
        _samples: usize,
        _wet_in: &[Sample],
        _slot_gain: f32,
        _dry_out: &mut [[Sample; OUTPUT_CHANNELS]],
    ) {
    }
}

/// Handle to an effect slot in a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) RawId);

/// Copyable slot facts needed while computing source parameters
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotInfo {
    pub aux_send_auto: bool,
    pub params: EffectParams,
}

/// An auxiliary effect slot
pub struct EffectSlot {
    state: Box<dyn EffectState>,
    params: EffectParams,
    pub(crate) gain: f32,
    pub(crate) aux_send_auto: bool,
    wet: Vec<Sample>,
    pub(crate) refs: u32,
}

impl EffectSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Box::new(NullEffect),
            params: EffectParams::None,
            gain: 1.0,
            aux_send_auto: true,
            wet: vec![0.0; BLOCK_SIZE],
            refs: 0,
        }
    }

    /// Replace the loaded effect
    pub(crate) fn set_effect(
        &mut self,
        mut state: Box<dyn EffectState>,
        params: EffectParams,
        device: &DeviceInfo,
    ) {
        state.device_update(device);
        state.update(&params);
        self.state = state;
        self.params = params;
    }

    /// Update parameters of the loaded effect
    pub(crate) fn set_params(&mut self, params: EffectParams) {
        self.params = params;
        self.state.update(&params);
    }

    pub(crate) fn params(&self) -> EffectParams {
        self.params
    }

    pub(crate) fn info(&self) -> SlotInfo {
        SlotInfo {
            aux_send_auto: self.aux_send_auto,
            params: self.params,
        }
    }

    /// Wet accumulation lane for the current block
    #[inline]
    pub(crate) fn wet_mut(&mut self) -> &mut [Sample] {
        &mut self.wet
    }

    /// Run the effect over this block's wet input, then clear it for the
    /// next block.
    pub(crate) fn run(&mut self, samples: usize, dry_out: &mut [[Sample; OUTPUT_CHANNELS]]) {
        self.state
            .process(samples, &self.wet[..samples], self.gain, dry_out);
        self.wet[..samples].fill(0.0);
    }
}
