//! Media samples
//!
//! A media sample is a timed byte buffer plus a side-data endpoint, the two
//! capabilities the pipeline needs from the graph's sample objects. Samples
//! come out of the [`SampleAllocator`](super::allocator::SampleAllocator)
//! with the SIMD buffer padding already applied.

use super::media_type::MediaType;
use super::side_data::SideDataStore;

/// A sample travelling through the filter: pixel bytes, optional start/stop
/// reference times, an optional attached media type announcing a format
/// change, a discontinuity flag and the side-data store.
#[derive(Debug, Clone)]
pub struct MediaSample {
    buffer: Vec<u8>,
    /// Bytes of actual pixel data; the buffer may be larger due to padding.
    actual_length: usize,
    time: Option<(i64, i64)>,
    media_type: Option<MediaType>,
    discontinuity: bool,
    side_data: SideDataStore,
}

impl MediaSample {
    /// Wrap an existing padded buffer. `actual_length` is the pixel payload
    /// size, excluding padding.
    pub fn new(buffer: Vec<u8>, actual_length: usize) -> Self {
        debug_assert!(actual_length <= buffer.len());
        Self {
            buffer,
            actual_length,
            time: None,
            media_type: None,
            discontinuity: false,
            side_data: SideDataStore::new(),
        }
    }

    /// The full buffer including trailing padding. Vector stores in the
    /// converter may touch the padding bytes; their content is junk.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// The pixel payload without padding.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length]
    }

    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    pub fn set_actual_length(&mut self, length: usize) {
        debug_assert!(length <= self.buffer.len());
        self.actual_length = length;
    }

    /// Start/stop reference times, when the upstream set them.
    pub fn time(&self) -> Option<(i64, i64)> {
        self.time
    }

    pub fn set_time(&mut self, start: i64, stop: i64) {
        self.time = Some((start, stop));
    }

    pub fn clear_time(&mut self) {
        self.time = None;
    }

    /// A media type attached to the sample announces that this and all
    /// following samples use the new format.
    pub fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    pub fn set_media_type(&mut self, media_type: MediaType) {
        self.media_type = Some(media_type);
    }

    pub fn take_media_type(&mut self) -> Option<MediaType> {
        self.media_type.take()
    }

    pub fn is_discontinuity(&self) -> bool {
        self.discontinuity
    }

    pub fn set_discontinuity(&mut self, discontinuity: bool) {
        self.discontinuity = discontinuity;
    }

    pub fn side_data(&self) -> &SideDataStore {
        &self.side_data
    }

    pub fn side_data_mut(&mut self) -> &mut SideDataStore {
        &mut self.side_data
    }

    /// Consume the sample and recover its backing storage, for allocators
    /// that pool buffers across samples.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}
