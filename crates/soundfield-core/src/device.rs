//! Devices: the audio endpoint and engine entry point
//!
//! A device owns the buffer arena, the contexts, and the shared dry mix
//! block. All mutable scene state sits behind one mutex; every mutation
//! entry point takes it for bounded bookkeeping, and the backend-driven
//! `mix` takes it once per block. Sample data is refcounted-immutable, so
//! nothing the inner loops read can change mid-block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::arena::Arena;
use crate::buffer::{BufferArena, BufferId, SampleData};
use crate::config::EngineConfig;
use crate::context::{Context, ContextId};
use crate::crossfeed::Crossfeed;
use crate::effect::{DeviceInfo, EffectParams, EffectState, SlotId};
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::mixer::{mix_context, process_effect_slots, update_dirty_params};
use crate::output::{write_block, OutputSample};
use crate::panning::device_channel_order;
use crate::source::{FilterSettings, QueueEntry, Source, SourceAtomics, SourceId};
use crate::types::{
    DeviceFormat, DistanceModel, PlayState, Sample, SpeakerLayout, BLOCK_SIZE, MAX_SENDS,
    OUTPUT_CHANNELS,
};

/// Options for opening a device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Output rate in Hz
    pub frequency: u32,
    /// Output channel layout and sample width
    pub format: DeviceFormat,
    /// Requested auxiliary sends per source (capped by the engine config
    /// and by `MAX_SENDS`)
    pub num_aux_sends: usize,
    /// Engine tunables (layout overrides, head dampening, crossfeed, ...)
    pub engine: EngineConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frequency: 44100,
            format: DeviceFormat::new(SpeakerLayout::Stereo, crate::types::SampleType::F32),
            num_aux_sends: MAX_SENDS,
            engine: EngineConfig::default(),
        }
    }
}

struct DeviceScene {
    contexts: Arena<Context>,
    buffers: BufferArena,
    /// Shared dry mix block, one lane per output channel
    dry: Vec<[Sample; OUTPUT_CHANNELS]>,
    /// Per-send wet accumulation reused across sources
    wet_scratch: Vec<Vec<Sample>>,
    crossfeed: Option<Crossfeed>,
}

/// A process-wide audio endpoint
pub struct Device {
    frequency: u32,
    format: DeviceFormat,
    num_aux_sends: usize,
    head_dampen: f32,
    connected: AtomicBool,
    engine_config: EngineConfig,
    scene: Mutex<DeviceScene>,
}

impl Device {
    /// Open a device with the given output parameters.
    pub fn open(config: DeviceConfig) -> Result<Device> {
        if config.frequency == 0 {
            return Err(Error::InvalidValue { name: "frequency", value: 0.0 });
        }

        let num_aux_sends = config.num_aux_sends.min(config.engine.sends).min(MAX_SENDS);

        // Head occlusion is only simulated on layouts without real
        // rear/side speakers
        let head_dampen = if config.format.layout.channel_count() <= 2 {
            config.engine.head_dampen.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let crossfeed = (config.format.layout == SpeakerLayout::Stereo
            && config.engine.crossfeed_level > 0)
            .then(|| Crossfeed::new(config.engine.crossfeed_level, config.frequency));

        log::debug!(
            "device open: {} Hz, {:?}, {} aux sends",
            config.frequency,
            config.format.layout,
            num_aux_sends
        );

        Ok(Device {
            frequency: config.frequency,
            format: config.format,
            num_aux_sends,
            head_dampen,
            connected: AtomicBool::new(true),
            engine_config: config.engine,
            scene: Mutex::new(DeviceScene {
                contexts: Arena::new(),
                buffers: BufferArena::new(),
                dry: vec![[0.0; OUTPUT_CHANNELS]; BLOCK_SIZE],
                wet_scratch: (0..MAX_SENDS).map(|_| vec![0.0; BLOCK_SIZE]).collect(),
                crossfeed,
            }),
        })
    }

    fn scene(&self) -> MutexGuard<'_, DeviceScene> {
        self.scene.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn format(&self) -> DeviceFormat {
        self.format
    }

    pub fn num_aux_sends(&self) -> usize {
        self.num_aux_sends
    }

    /// Whether the backend still services this device
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    // --- Contexts ---

    pub fn create_context(&self) -> ContextId {
        let mut scene = self.scene();
        let ctx = Context::new(self.format.layout, &self.engine_config);
        ContextId(scene.contexts.insert(ctx))
    }

    /// Destroy a context, releasing every buffer its sources referenced.
    pub fn destroy_context(&self, id: ContextId) -> Result<()> {
        let mut guard = self.scene();
        let scene = &mut *guard;
        let ctx = scene.contexts.remove(id.0).ok_or(Error::NoSuchContext)?;
        for source in ctx.sources.iter() {
            for entry in &source.queue {
                scene.buffers.release(entry.id);
            }
        }
        Ok(())
    }

    // --- Buffers ---

    pub fn create_buffer(&self, data: SampleData) -> BufferId {
        self.scene().buffers.insert(data)
    }

    /// Delete a buffer; rejected while any queue references it.
    pub fn delete_buffer(&self, id: BufferId) -> Result<()> {
        self.scene().buffers.remove(id)
    }

    // --- Sources ---

    pub fn create_source(&self, ctx: ContextId) -> Result<SourceId> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        Ok(ctx.add_source())
    }

    /// Delete a source, releasing its queue and send references.
    pub fn delete_source(&self, ctx: ContextId, id: SourceId) -> Result<()> {
        let mut guard = self.scene();
        let scene = &mut *guard;
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let source = ctx.sources.remove(id.0).ok_or(Error::NoSuchSource)?;

        for entry in &source.queue {
            scene.buffers.release(entry.id);
        }
        for send in &source.sends {
            if let Some(slot_id) = send.slot {
                if let Some(slot) = ctx.slot_mut(slot_id) {
                    slot.refs = slot.refs.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    /// Mutate a source under the scene lock. Setters on [`Source`] mark
    /// the retained parameters dirty themselves.
    pub fn update_source<R>(
        &self,
        ctx: ContextId,
        id: SourceId,
        f: impl FnOnce(&mut Source) -> R,
    ) -> Result<R> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let source = ctx.source_mut(id).ok_or(Error::NoSuchSource)?;
        Ok(f(source))
    }

    pub fn source_state(&self, ctx: ContextId, id: SourceId) -> Result<PlayState> {
        let scene = self.scene();
        let ctx = scene.contexts.get(ctx.0).ok_or(Error::NoSuchContext)?;
        Ok(ctx.source(id).ok_or(Error::NoSuchSource)?.state())
    }

    /// Lock-free position/state observation handle
    pub fn source_atomics(&self, ctx: ContextId, id: SourceId) -> Result<Arc<SourceAtomics>> {
        let scene = self.scene();
        let ctx = scene.contexts.get(ctx.0).ok_or(Error::NoSuchContext)?;
        Ok(ctx.source(id).ok_or(Error::NoSuchSource)?.atomics())
    }

    // --- Playback control ---

    pub fn play(&self, ctx: ContextId, id: SourceId) -> Result<()> {
        let connected = self.connected();
        self.update_source(ctx, id, |source| source.play(connected))
    }

    pub fn pause(&self, ctx: ContextId, id: SourceId) -> Result<()> {
        self.update_source(ctx, id, |source| source.pause())
    }

    pub fn stop(&self, ctx: ContextId, id: SourceId) -> Result<()> {
        self.update_source(ctx, id, |source| source.stop())
    }

    pub fn rewind(&self, ctx: ContextId, id: SourceId) -> Result<()> {
        self.update_source(ctx, id, |source| source.rewind())
    }

    // --- Queue management ---

    pub fn queue_buffer(&self, ctx: ContextId, id: SourceId, buffer: BufferId) -> Result<()> {
        let mut guard = self.scene();
        let scene = &mut *guard;
        let data = scene.buffers.data(buffer)?;
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let source = ctx.source_mut(id).ok_or(Error::NoSuchSource)?;
        source.push_queue_entry(QueueEntry { id: buffer, data })?;
        scene.buffers.add_ref(buffer)?;
        Ok(())
    }

    /// Remove and return the fully-processed entries at the queue head.
    pub fn unqueue_processed(&self, ctx: ContextId, id: SourceId) -> Result<Vec<BufferId>> {
        let mut guard = self.scene();
        let scene = &mut *guard;
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let source = ctx.source_mut(id).ok_or(Error::NoSuchSource)?;
        let entries = source.take_processed();
        let ids: Vec<BufferId> = entries.iter().map(|entry| entry.id).collect();
        for entry in &entries {
            scene.buffers.release(entry.id);
        }
        Ok(ids)
    }

    /// Empty the queue. Only legal while the source is stopped or initial.
    pub fn clear_queue(&self, ctx: ContextId, id: SourceId) -> Result<Vec<BufferId>> {
        let mut guard = self.scene();
        let scene = &mut *guard;
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let source = ctx.source_mut(id).ok_or(Error::NoSuchSource)?;
        let entries = source.take_queue()?;
        let ids: Vec<BufferId> = entries.iter().map(|entry| entry.id).collect();
        for entry in &entries {
            scene.buffers.release(entry.id);
        }
        Ok(ids)
    }

    // --- Effect slots and sends ---

    pub fn create_effect_slot(&self, ctx: ContextId) -> Result<SlotId> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        Ok(ctx.add_slot())
    }

    /// Delete a slot; rejected while any source send references it.
    pub fn delete_effect_slot(&self, ctx: ContextId, id: SlotId) -> Result<()> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let slot = ctx.slot(id).ok_or(Error::NoSuchSlot)?;
        if slot.refs > 0 {
            return Err(Error::SlotInUse { refs: slot.refs });
        }
        ctx.slots.remove(id.0);
        Ok(())
    }

    pub fn set_slot_effect(
        &self,
        ctx: ContextId,
        id: SlotId,
        state: Box<dyn EffectState>,
        params: EffectParams,
    ) -> Result<()> {
        let info = DeviceInfo {
            frequency: self.frequency,
            num_aux_sends: self.num_aux_sends,
        };
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.slot_mut(id).ok_or(Error::NoSuchSlot)?.set_effect(state, params, &info);
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    pub fn set_slot_params(&self, ctx: ContextId, id: SlotId, params: EffectParams) -> Result<()> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.slot_mut(id).ok_or(Error::NoSuchSlot)?.set_params(params);
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    pub fn set_slot_gain(&self, ctx: ContextId, id: SlotId, gain: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(Error::InvalidValue { name: "slot_gain", value: gain });
        }
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.slot_mut(id).ok_or(Error::NoSuchSlot)?.gain = gain;
        Ok(())
    }

    /// Whether sends into this slot derive their gain from the source's
    /// cone/distance chain (on) or mirror the dry path (off).
    pub fn set_slot_send_auto(&self, ctx: ContextId, id: SlotId, auto: bool) -> Result<()> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.slot_mut(id).ok_or(Error::NoSuchSlot)?.aux_send_auto = auto;
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    /// Route one of a source's sends to an effect slot (or clear it).
    pub fn set_send(
        &self,
        ctx: ContextId,
        id: SourceId,
        index: usize,
        slot: Option<SlotId>,
        filter: FilterSettings,
    ) -> Result<()> {
        if index >= self.num_aux_sends {
            return Err(Error::SendOutOfRange { index, sends: self.num_aux_sends });
        }
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        if let Some(slot_id) = slot {
            if ctx.slot(slot_id).is_none() {
                return Err(Error::NoSuchSlot);
            }
        }
        let source = ctx.source_mut(id).ok_or(Error::NoSuchSource)?;

        let previous = source.sends[index].slot;
        source.sends[index] = crate::source::SourceSend { slot, filter };
        source.needs_update = true;

        if let Some(old) = previous {
            if let Some(old_slot) = ctx.slot_mut(old) {
                old_slot.refs = old_slot.refs.saturating_sub(1);
            }
        }
        if let Some(new) = slot {
            if let Some(new_slot) = ctx.slot_mut(new) {
                new_slot.refs += 1;
            }
        }
        Ok(())
    }

    // --- Listener and context parameters ---

    /// Mutate the context's listener; every source is re-marked dirty.
    pub fn update_listener<R>(
        &self,
        ctx: ContextId,
        f: impl FnOnce(&mut Listener) -> R,
    ) -> Result<R> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        let result = f(&mut ctx.listener);
        ctx.mark_all_sources_dirty();
        Ok(result)
    }

    pub fn set_distance_model(
        &self,
        ctx: ContextId,
        model: DistanceModel,
        per_source: bool,
    ) -> Result<()> {
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.distance_model = model;
        ctx.source_distance_model = per_source;
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    pub fn set_doppler_factor(&self, ctx: ContextId, factor: f32) -> Result<()> {
        if factor < 0.0 {
            return Err(Error::InvalidValue { name: "doppler_factor", value: factor });
        }
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.doppler_factor = factor;
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    pub fn set_doppler_velocity(&self, ctx: ContextId, velocity: f32) -> Result<()> {
        if velocity <= 0.0 {
            return Err(Error::InvalidValue { name: "doppler_velocity", value: velocity });
        }
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.doppler_velocity = velocity;
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    pub fn set_speed_of_sound(&self, ctx: ContextId, speed: f32) -> Result<()> {
        if speed <= 0.0 {
            return Err(Error::InvalidValue { name: "speed_of_sound", value: speed });
        }
        let mut scene = self.scene();
        let ctx = scene.contexts.get_mut(ctx.0).ok_or(Error::NoSuchContext)?;
        ctx.speed_of_sound = speed;
        ctx.mark_all_sources_dirty();
        Ok(())
    }

    // --- Mixing ---

    /// Fill `out` with mixed audio. The slice's sample type must match
    /// the device format; its length must be a whole number of frames.
    /// Requests longer than one block are chopped internally.
    pub fn mix<S: OutputSample>(&self, out: &mut [S]) -> Result<()> {
        if S::SAMPLE_TYPE != self.format.sample_type {
            return Err(Error::OutputFormatMismatch);
        }
        let channels = self.format.layout.channel_count();
        if out.len() % channels != 0 {
            return Err(Error::RaggedOutput { len: out.len(), channels });
        }
        let order = device_channel_order(self.format.layout);

        for block in out.chunks_mut(BLOCK_SIZE * channels) {
            let frames = block.len() / channels;

            let mut guard = self.scene();
            let scene = &mut *guard;
            let DeviceScene { contexts, dry, wet_scratch, crossfeed, .. } = scene;

            for frame in dry[..frames].iter_mut() {
                *frame = [0.0; OUTPUT_CHANNELS];
            }

            for ctx in contexts.iter_mut() {
                update_dirty_params(ctx, self.frequency, self.num_aux_sends, self.head_dampen);
                mix_context(ctx, dry, wet_scratch, frames, self.frequency, self.num_aux_sends);
                process_effect_slots(ctx, dry, frames);
            }

            write_block(block, dry, order, crossfeed.as_mut(), frames);
        }
        Ok(())
    }

    /// The backend lost the endpoint: force every playing source to
    /// stopped under the lock and mark the device disconnected. Purely a
    /// state transition; sources can be replayed after reconnection.
    pub fn handle_disconnect(&self) {
        let mut scene = self.scene();
        for ctx in scene.contexts.iter_mut() {
            for source in ctx.sources.iter_mut() {
                source.halt();
            }
        }
        self.connected.store(false, Ordering::Relaxed);
        log::warn!("device disconnected; playing sources stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SampleType, Vec3};

    fn stereo_device() -> Device {
        Device::open(DeviceConfig::default()).unwrap()
    }

    fn mono_buffer(device: &Device, samples: Vec<f32>) -> BufferId {
        device.create_buffer(SampleData::new(samples, 1, 44100).unwrap())
    }

    #[test]
    fn test_open_validates_frequency() {
        let config = DeviceConfig { frequency: 0, ..DeviceConfig::default() };
        assert!(Device::open(config).is_err());
    }

    #[test]
    fn test_send_count_is_capped() {
        let config = DeviceConfig { num_aux_sends: 99, ..DeviceConfig::default() };
        let device = Device::open(config).unwrap();
        assert_eq!(device.num_aux_sends(), MAX_SENDS);
    }

    #[test]
    fn test_mix_validates_output() {
        let device = stereo_device();
        let mut wrong_type = [0i16; 64];
        assert!(matches!(
            device.mix(&mut wrong_type),
            Err(Error::OutputFormatMismatch)
        ));

        let mut ragged = [0.0f32; 63];
        assert!(matches!(device.mix(&mut ragged), Err(Error::RaggedOutput { .. })));
    }

    #[test]
    fn test_mix_silence_with_no_sources() {
        let device = stereo_device();
        device.create_context();
        let mut out = [1.0f32; 256];
        device.mix(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_end_to_end_front_source_on_stereo() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![1.0; 44100]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        device
            .update_source(ctx, source, |s| {
                s.set_position(Vec3::new(0.0, 0.0, -1.0));
                s.set_ref_distance(1.0).unwrap();
                s.set_rolloff_factor(1.0).unwrap();
                s.set_gain(1.0)
            })
            .unwrap()
            .unwrap();
        device.play(ctx, source).unwrap();

        let mut out = [0.0f32; 512];
        device.mix(&mut out).unwrap();

        // Source dead ahead at the reference distance: no attenuation and
        // a symmetric constant-power pan (cos 45 = sin 45)
        let left = out[100];
        let right = out[101];
        assert!((left - right).abs() < 1e-5);
        assert!((left - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn test_buffer_delete_guarded_by_queue_ref() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![0.0; 64]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();

        assert!(matches!(
            device.delete_buffer(buffer),
            Err(Error::BufferInUse { .. })
        ));

        device.clear_queue(ctx, source).unwrap();
        device.delete_buffer(buffer).unwrap();
    }

    #[test]
    fn test_delete_source_releases_references() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![0.0; 64]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();

        device.delete_source(ctx, source).unwrap();
        device.delete_buffer(buffer).unwrap();
        assert!(device.play(ctx, source).is_err());
    }

    #[test]
    fn test_slot_delete_guarded_by_send_ref() {
        let device = stereo_device();
        let ctx = device.create_context();
        let source = device.create_source(ctx).unwrap();
        let slot = device.create_effect_slot(ctx).unwrap();

        device
            .set_send(ctx, source, 0, Some(slot), FilterSettings::default())
            .unwrap();
        assert!(matches!(
            device.delete_effect_slot(ctx, slot),
            Err(Error::SlotInUse { .. })
        ));

        device
            .set_send(ctx, source, 0, None, FilterSettings::default())
            .unwrap();
        device.delete_effect_slot(ctx, slot).unwrap();
    }

    #[test]
    fn test_send_index_range_checked() {
        let device = stereo_device();
        let ctx = device.create_context();
        let source = device.create_source(ctx).unwrap();
        let result = device.set_send(ctx, source, MAX_SENDS, None, FilterSettings::default());
        assert!(matches!(result, Err(Error::SendOutOfRange { .. })));
    }

    #[test]
    fn test_disconnect_stops_playing_sources() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![0.5; 44100]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        device.play(ctx, source).unwrap();
        assert_eq!(device.source_state(ctx, source).unwrap(), PlayState::Playing);

        device.handle_disconnect();
        assert!(!device.connected());
        assert_eq!(device.source_state(ctx, source).unwrap(), PlayState::Stopped);

        // Starting a source on a disconnected device goes straight to
        // stopped as well
        device.rewind(ctx, source).unwrap();
        device.play(ctx, source).unwrap();
        assert_eq!(device.source_state(ctx, source).unwrap(), PlayState::Stopped);
    }

    #[test]
    fn test_i16_device_output() {
        let device = Device::open(DeviceConfig {
            format: DeviceFormat::new(SpeakerLayout::Mono, SampleType::I16),
            ..DeviceConfig::default()
        })
        .unwrap();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![1.0; 4096]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        device.play(ctx, source).unwrap();

        let mut out = [0i16; 128];
        device.mix(&mut out).unwrap();
        // Mono layout routes the (single-speaker) LUT straight to center
        // at full gain
        assert!(out[64] > 30000);
    }

    #[test]
    fn test_multi_block_mix_request() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![0.5; 3 * BLOCK_SIZE]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        device.play(ctx, source).unwrap();

        // Two and a half blocks in one request
        let frames = 2 * BLOCK_SIZE + BLOCK_SIZE / 2;
        let mut out = vec![0.0f32; frames * 2];
        device.mix(&mut out).unwrap();

        let atomics = device.source_atomics(ctx, source).unwrap();
        assert_eq!(atomics.position(), frames as u64);
        assert!(out[2 * (frames - 1)] != 0.0);
    }

    #[test]
    fn test_source_atomics_expose_progress() {
        let device = stereo_device();
        let ctx = device.create_context();
        let buffer = mono_buffer(&device, vec![0.5; 8192]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        let atomics = device.source_atomics(ctx, source).unwrap();

        device.play(ctx, source).unwrap();
        let mut out = [0.0f32; 512];
        device.mix(&mut out).unwrap();

        assert_eq!(atomics.play_state(), PlayState::Playing);
        assert_eq!(atomics.position(), 256);
    }

    #[test]
    fn test_output_lane_for_quad(){
        let device = Device::open(DeviceConfig {
            format: DeviceFormat::new(SpeakerLayout::Quad, SampleType::F32),
            ..DeviceConfig::default()
        })
        .unwrap();
        let ctx = device.create_context();
        // A source far to the left lands mostly in the left speakers
        let buffer = mono_buffer(&device, vec![1.0; 4096]);
        let source = device.create_source(ctx).unwrap();
        device.queue_buffer(ctx, source, buffer).unwrap();
        device
            .update_source(ctx, source, |s| s.set_position(Vec3::new(-5.0, 0.0, 0.0)))
            .unwrap();
        device.play(ctx, source).unwrap();

        let mut out = [0.0f32; 4 * 64];
        device.mix(&mut out).unwrap();
        let frame = &out[4 * 32..4 * 32 + 4];
        // Order: FL, FR, BL, BR
        assert!(frame[0] > frame[1]);
        assert!(frame[2] > frame[3]);
    }
}
