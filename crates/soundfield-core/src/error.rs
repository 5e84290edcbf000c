//! Engine error types

use thiserror::Error;

/// Errors returned by the mutation API.
///
/// The mixer itself never returns errors; silence is the fallback for any
/// unrepresentable state.
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter value is outside its legal range
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: f32 },

    /// Context id does not resolve
    #[error("Context not found")]
    NoSuchContext,

    /// Source id does not resolve
    #[error("Source not found")]
    NoSuchSource,

    /// Buffer id does not resolve
    #[error("Buffer not found")]
    NoSuchBuffer,

    /// Effect slot id does not resolve
    #[error("Effect slot not found")]
    NoSuchSlot,

    /// Buffer is still referenced by at least one source queue
    #[error("Buffer is still referenced by {refs} queue entries")]
    BufferInUse { refs: u32 },

    /// Effect slot is still referenced by at least one source send
    #[error("Effect slot is still referenced by {refs} sends")]
    SlotInUse { refs: u32 },

    /// Queue operation rejected while the source is playing or paused
    #[error("Source queue cannot be changed in the {state:?} state")]
    QueueLocked { state: crate::types::PlayState },

    /// Queued buffer format differs from the rest of the queue
    #[error("Buffer format mismatch: queue is {queued} channels @ {queued_hz} Hz, buffer is {new} channels @ {new_hz} Hz")]
    QueueFormatMismatch {
        queued: usize,
        queued_hz: u32,
        new: usize,
        new_hz: u32,
    },

    /// Sample data is malformed (bad channel count, ragged frame, zero rate)
    #[error("Invalid sample data: {0}")]
    InvalidSampleData(&'static str),

    /// Send index is outside the device's configured send count
    #[error("Send index {index} out of range (device has {sends} sends)")]
    SendOutOfRange { index: usize, sends: usize },

    /// Output slice type does not match the device format
    #[error("Output sample type does not match the device format")]
    OutputFormatMismatch,

    /// Output slice length is not a whole number of frames
    #[error("Output length {len} is not a multiple of {channels} channels")]
    RaggedOutput { len: usize, channels: usize },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
