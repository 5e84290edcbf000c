//! Sample buffers
//!
//! A buffer is immutable PCM data plus its format and native frequency.
//! Integer input is normalized to f32 at creation so the mixer only ever
//! touches one representation. Buffers are stored in a device-wide arena
//! and reference-counted by the source queues that cite them; the sample
//! memory itself is a `Shared` allocation so dropping the last reference
//! never frees it inline.

use basedrop::Shared;

use crate::arena::{Arena, RawId};
use crate::error::{Error, Result};
use crate::gc::gc_handle;
use crate::types::{Sample, SampleType};

/// Channel counts a source buffer may carry (mono through 7.1)
const VALID_CHANNELS: [usize; 6] = [1, 2, 4, 6, 7, 8];

/// Immutable PCM sample data: interleaved f32 frames at a native rate.
#[derive(Debug)]
pub struct SampleData {
    samples: Vec<Sample>,
    channels: usize,
    frequency: u32,
}

impl SampleData {
    /// Wrap interleaved float samples.
    pub fn new(samples: Vec<Sample>, channels: usize, frequency: u32) -> Result<Self> {
        if !VALID_CHANNELS.contains(&channels) {
            return Err(Error::InvalidSampleData("unsupported channel count"));
        }
        if frequency == 0 {
            return Err(Error::InvalidSampleData("zero sample rate"));
        }
        if samples.len() % channels != 0 {
            return Err(Error::InvalidSampleData("ragged final frame"));
        }
        Ok(Self { samples, channels, frequency })
    }

    /// Normalize signed 16-bit samples to float.
    pub fn from_i16(samples: &[i16], channels: usize, frequency: u32) -> Result<Self> {
        let samples = samples.iter().map(|&s| s as f32 / 32768.0).collect();
        Self::new(samples, channels, frequency)
    }

    /// Normalize unsigned 8-bit samples (biased around 128) to float.
    pub fn from_u8(samples: &[u8], channels: usize, frequency: u32) -> Result<Self> {
        let samples = samples
            .iter()
            .map(|&s| (s as i16 - 128) as f32 / 128.0)
            .collect();
        Self::new(samples, channels, frequency)
    }

    /// Decode little-endian PCM bytes in the given width.
    pub fn from_pcm_bytes(
        bytes: &[u8],
        sample_type: SampleType,
        channels: usize,
        frequency: u32,
    ) -> Result<Self> {
        let width = sample_type.bytes();
        if bytes.len() % width != 0 {
            return Err(Error::InvalidSampleData("byte length not a whole sample"));
        }
        match sample_type {
            SampleType::U8 => Self::from_u8(bytes, channels, frequency),
            SampleType::I16 => {
                let samples: Vec<i16> = bytes
                    .chunks_exact(2)
                    .map(bytemuck::pod_read_unaligned::<i16>)
                    .collect();
                Self::from_i16(&samples, channels, frequency)
            }
            SampleType::F32 => {
                let samples: Vec<f32> = bytes
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<f32>)
                    .collect();
                Self::new(samples, channels, frequency)
            }
        }
    }

    /// Interleaved samples
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Interleaved channel count
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Native sample rate in Hz
    #[inline]
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

/// Handle to a buffer in a device's [`BufferArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) RawId);

struct BufferEntry {
    data: Shared<SampleData>,
    refs: u32,
}

/// Device-wide buffer storage with queue reference counting.
pub(crate) struct BufferArena {
    inner: Arena<BufferEntry>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self { inner: Arena::new() }
    }

    pub fn insert(&mut self, data: SampleData) -> BufferId {
        let data = Shared::new(&gc_handle(), data);
        BufferId(self.inner.insert(BufferEntry { data, refs: 0 }))
    }

    /// Delete a buffer. Rejected while any source queue still references it.
    pub fn remove(&mut self, id: BufferId) -> Result<()> {
        let entry = self.inner.get(id.0).ok_or(Error::NoSuchBuffer)?;
        if entry.refs > 0 {
            return Err(Error::BufferInUse { refs: entry.refs });
        }
        self.inner.remove(id.0);
        Ok(())
    }

    /// Shared handle to the sample data for queueing
    pub fn data(&self, id: BufferId) -> Result<Shared<SampleData>> {
        self.inner
            .get(id.0)
            .map(|entry| Shared::clone(&entry.data))
            .ok_or(Error::NoSuchBuffer)
    }

    /// Record one more queue reference
    pub fn add_ref(&mut self, id: BufferId) -> Result<()> {
        let entry = self.inner.get_mut(id.0).ok_or(Error::NoSuchBuffer)?;
        entry.refs += 1;
        Ok(())
    }

    /// Drop one queue reference. Unknown ids are ignored; the queue entry
    /// keeps its own `Shared` handle so the data stays valid regardless.
    pub fn release(&mut self, id: BufferId) {
        if let Some(entry) = self.inner.get_mut(id.0) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    pub fn refs(&self, id: BufferId) -> Result<u32> {
        self.inner
            .get(id.0)
            .map(|entry| entry.refs)
            .ok_or(Error::NoSuchBuffer)
    }
}
