//! The listener: the single ear of a context

use crate::types::Vec3;

/// Listener pose and gain. Owned by a [`crate::Context`]; there is no
/// process-wide listener state.
#[derive(Debug, Clone)]
pub struct Listener {
    /// World-space position
    pub position: Vec3,
    /// World-space velocity, used by the doppler shift
    pub velocity: Vec3,
    /// Facing direction ("at" vector)
    pub forward: Vec3,
    /// Up vector; together with `forward` this defines listener space
    pub up: Vec3,
    /// Master gain applied to every source in the context
    pub gain: f32,
    /// World units per metre, scaling the air-absorption distances
    pub meters_per_unit: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            gain: 1.0,
            meters_per_unit: 1.0,
        }
    }
}
