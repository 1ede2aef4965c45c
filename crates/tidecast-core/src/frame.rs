//! Frame model: one tick's worth of PCM plus metadata markers.

use std::collections::BTreeMap;

/// Stream metadata attached to a point in the sample flow (artist, title, …).
pub type Metadata = BTreeMap<String, String>;

/// A fixed-capacity block of interleaved f32 PCM with metadata markers.
///
/// Frames are the unit the clock drives: one frame per active source per
/// tick. A frame is meant to be reused; `clear` resets it without touching
/// its allocation.
#[derive(Debug)]
pub struct Frame {
    samples: Vec<f32>,
    metadata: Vec<(usize, Metadata)>,
    capacity: usize,
}

impl Frame {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            metadata: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Free sample slots left in this frame.
    pub fn remaining(&self) -> usize {
        self.capacity - self.samples.len().min(self.capacity)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn metadata(&self) -> &[(usize, Metadata)] {
        &self.metadata
    }

    /// Append samples, up to the frame capacity. Returns how many were taken.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let take = samples.len().min(self.remaining());
        self.samples.extend_from_slice(&samples[..take]);
        take
    }

    /// Attach a metadata marker at the current write position.
    pub fn push_metadata(&mut self, metadata: Metadata) {
        self.metadata.push((self.samples.len(), metadata));
    }

    /// Attach a metadata marker at an explicit sample offset.
    pub fn push_metadata_at(&mut self, offset: usize, metadata: Metadata) {
        let offset = offset.min(self.samples.len());
        self.metadata.push((offset, metadata));
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.metadata.clear();
    }
}
