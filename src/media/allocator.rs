//! Custom media sample allocator
//!
//! Produces [`MediaSample`]s whose buffers carry the trailing padding the
//! vector conversion paths rely on, laid out the way the graph's allocator
//! contract demands: `alignedSize = size + prefix` rounded up to a multiple
//! of `alignment`, `total = count * alignedSize` capped to the signed 32-bit
//! range, each sample's payload starting `prefix` bytes into its slot.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::sample::MediaSample;

/// Requested/actual buffer layout, the `ALLOCATOR_PROPERTIES` analog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorProperties {
    /// Number of pooled sample buffers.
    pub count: usize,
    /// Usable bytes per sample, including conversion padding.
    pub size: usize,
    /// Slot alignment in bytes; must be a power of two.
    pub alignment: usize,
    /// Bytes reserved in front of each sample's payload.
    pub prefix: usize,
}

impl Default for AllocatorProperties {
    fn default() -> Self {
        Self { count: 2, size: 0, alignment: 1, prefix: 0 }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("invalid allocator properties: {0}")]
    InvalidProperties(&'static str),

    #[error("requested pool of {total} bytes exceeds the allocator range")]
    PoolTooLarge { total: u64 },

    #[error("allocator is not committed")]
    NotCommitted,

    #[error("all {0} sample buffers are outstanding")]
    Exhausted(usize),
}

struct PoolState {
    committed: bool,
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

/// Pooled allocator handing out padded sample buffers.
pub struct SampleAllocator {
    properties: Mutex<AllocatorProperties>,
    pool: Mutex<PoolState>,
}

impl Default for SampleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleAllocator {
    pub fn new() -> Self {
        Self {
            properties: Mutex::new(AllocatorProperties::default()),
            pool: Mutex::new(PoolState { committed: false, free: Vec::new(), outstanding: 0 }),
        }
    }

    /// Validate and adopt `request`, returning the actual layout. Must be
    /// called while decommitted.
    pub fn set_properties(
        &self,
        request: AllocatorProperties,
    ) -> Result<AllocatorProperties, AllocatorError> {
        if request.count == 0 {
            return Err(AllocatorError::InvalidProperties("count must be at least 1"));
        }
        if request.size == 0 {
            return Err(AllocatorError::InvalidProperties("size must be at least 1"));
        }
        if request.alignment == 0 || !request.alignment.is_power_of_two() {
            return Err(AllocatorError::InvalidProperties("alignment must be a power of two"));
        }

        let aligned = Self::aligned_size(&request);
        let total = request.count as u64 * aligned as u64;
        if total > i32::MAX as u64 {
            return Err(AllocatorError::PoolTooLarge { total });
        }

        let mut properties = self.properties.lock();
        *properties = request;
        Ok(*properties)
    }

    pub fn properties(&self) -> AllocatorProperties {
        *self.properties.lock()
    }

    /// Grow the per-sample size to at least `min_size`, re-committing if the
    /// allocator was live. Used when an already-connected input renegotiates
    /// to a larger frame.
    pub fn ensure_minimum_size(&self, min_size: usize) -> Result<(), AllocatorError> {
        let mut request = self.properties();
        if request.size >= min_size {
            return Ok(());
        }
        request.size = min_size;

        let was_committed = self.pool.lock().committed;
        if was_committed {
            self.decommit();
        }
        self.set_properties(request)?;
        if was_committed {
            self.commit()?;
        }

        debug!(size = min_size, "Allocator buffer size renegotiated");
        Ok(())
    }

    /// Allocate the pool according to the current properties.
    pub fn commit(&self) -> Result<(), AllocatorError> {
        let properties = self.properties();
        if properties.size == 0 {
            return Err(AllocatorError::InvalidProperties("commit before set_properties"));
        }

        let mut pool = self.pool.lock();
        if pool.committed {
            return Ok(());
        }

        let payload = Self::aligned_size(&properties) - properties.prefix;
        pool.free = (0..properties.count).map(|_| vec![0u8; payload]).collect();
        pool.outstanding = 0;
        pool.committed = true;
        Ok(())
    }

    /// Drop the pooled buffers. Outstanding samples stay valid; their
    /// buffers are discarded on release.
    pub fn decommit(&self) {
        let mut pool = self.pool.lock();
        pool.committed = false;
        pool.free.clear();
    }

    /// Hand out a sample backed by a pooled buffer.
    pub fn obtain(&self) -> Result<MediaSample, AllocatorError> {
        let properties = self.properties();
        let mut pool = self.pool.lock();
        if !pool.committed {
            return Err(AllocatorError::NotCommitted);
        }
        let buffer = pool.free.pop().ok_or(AllocatorError::Exhausted(properties.count))?;
        pool.outstanding += 1;
        Ok(MediaSample::new(buffer, properties.size))
    }

    /// Return a sample's buffer to the pool.
    pub fn release(&self, sample: MediaSample) {
        let mut pool = self.pool.lock();
        if pool.outstanding > 0 {
            pool.outstanding -= 1;
        }
        if pool.committed {
            let mut buffer = sample.into_buffer();
            buffer.fill(0);
            pool.free.push(buffer);
        }
    }

    fn aligned_size(properties: &AllocatorProperties) -> usize {
        let unaligned = properties.size + properties.prefix;
        unaligned.div_ceil(properties.alignment) * properties.alignment
    }
}
