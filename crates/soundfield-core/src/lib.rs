//! Soundfield Core - a 3D positional audio mixing engine
//!
//! Sources placed in a scene are distance-attenuated, cone-filtered,
//! doppler-shifted and panned across the device's speaker layout, then
//! resampled and accumulated sample-accurately into a shared mix block
//! with per-send auxiliary effect routing. The backend contract is a
//! single call: hand [`Device::mix`] an output slice whenever the
//! hardware wants audio.

pub mod buffer;
pub mod config;
pub mod context;
pub mod device;
pub mod effect;
pub mod error;
pub mod filter;
pub mod listener;
pub mod output;
pub mod panning;
pub mod source;
pub mod types;

mod arena;
mod crossfeed;
mod gc;
mod mixer;
mod params;

pub use buffer::{BufferId, SampleData};
pub use config::{load_config, save_config, EngineConfig};
pub use context::ContextId;
pub use device::{Device, DeviceConfig};
pub use effect::{DeviceInfo, EffectParams, EffectState, NullEffect, ReverbParams, SlotId};
pub use error::{Error, Result};
pub use listener::Listener;
pub use output::OutputSample;
pub use source::{FilterSettings, SourceAtomics, SourceId};
pub use types::*;
