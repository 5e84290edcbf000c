//! Contexts: one listener and its sources and effect slots
//!
//! A context owns everything one "scene" needs: the listener, the source
//! and effect-slot arenas, the doppler and distance-model settings, and
//! the panning state derived from the device's speaker layout. Contexts
//! are created and destroyed independently; the device outlives them.

use crate::arena::{Arena, RawId};
use crate::config::EngineConfig;
use crate::effect::{EffectSlot, SlotId};
use crate::listener::Listener;
use crate::panning::Panning;
use crate::source::{Source, SourceId};
use crate::types::{DistanceModel, Resampler, SpeakerLayout, SPEED_OF_SOUND_METRES_PER_SEC};

/// Handle to a context on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) RawId);

pub struct Context {
    pub(crate) listener: Listener,
    pub(crate) sources: Arena<Source>,
    pub(crate) slots: Arena<EffectSlot>,
    pub(crate) distance_model: DistanceModel,
    /// When set, each source's own distance model wins
    pub(crate) source_distance_model: bool,
    pub(crate) doppler_factor: f32,
    pub(crate) doppler_velocity: f32,
    pub(crate) speed_of_sound: f32,
    pub(crate) panning: Panning,
    pub(crate) default_resampler: Resampler,
}

impl Context {
    pub(crate) fn new(layout: SpeakerLayout, config: &EngineConfig) -> Self {
        Self {
            listener: Listener::default(),
            sources: Arena::new(),
            slots: Arena::new(),
            distance_model: DistanceModel::InverseDistanceClamped,
            source_distance_model: false,
            doppler_factor: 1.0,
            doppler_velocity: 1.0,
            speed_of_sound: SPEED_OF_SOUND_METRES_PER_SEC,
            panning: Panning::new(layout, config),
            default_resampler: config.resampler,
        }
    }

    /// Flag every source for parameter recalculation. Called after any
    /// listener- or context-level change.
    pub(crate) fn mark_all_sources_dirty(&mut self) {
        for source in self.sources.iter_mut() {
            source.needs_update = true;
        }
    }

    pub(crate) fn add_source(&mut self) -> SourceId {
        SourceId(self.sources.insert(Source::new(self.default_resampler)))
    }

    pub(crate) fn add_slot(&mut self) -> SlotId {
        SlotId(self.slots.insert(EffectSlot::new()))
    }

    pub(crate) fn source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id.0)
    }

    pub(crate) fn source_mut(&mut self, id: SourceId) -> Option<&mut Source> {
        self.sources.get_mut(id.0)
    }

    pub(crate) fn slot(&self, id: SlotId) -> Option<&EffectSlot> {
        self.slots.get(id.0)
    }

    pub(crate) fn slot_mut(&mut self, id: SlotId) -> Option<&mut EffectSlot> {
        self.slots.get_mut(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults() {
        let ctx = Context::new(SpeakerLayout::Stereo, &EngineConfig::default());
        assert_eq!(ctx.distance_model, DistanceModel::InverseDistanceClamped);
        assert_eq!(ctx.doppler_factor, 1.0);
        assert_eq!(ctx.speed_of_sound, SPEED_OF_SOUND_METRES_PER_SEC);
        assert_eq!(ctx.panning.num_chans, 2);
        assert!(ctx.sources.is_empty());
    }

    #[test]
    fn test_mark_all_sources_dirty() {
        let mut ctx = Context::new(SpeakerLayout::Stereo, &EngineConfig::default());
        let id = ctx.add_source();
        ctx.source_mut(id).unwrap().needs_update = false;

        ctx.mark_all_sources_dirty();
        assert!(ctx.source(id).unwrap().needs_update);
    }
}
