//! Aligned host-memory allocator.

use std::alloc::{self, Layout};
use std::ffi::c_void;

use tessera_core::{Device, DeviceType, MemConfig};

use crate::allocator::Allocator;
use crate::data_ptr::DataPtr;
use crate::error::{Error, Result};
use crate::tracking::AllocationStats;

static DEFAULT_CPU_STATS: AllocationStats = AllocationStats::new();

static DEFAULT_CPU_ALLOCATOR: CpuAllocator = CpuAllocator {
    alignment: CpuAllocator::DEFAULT_ALIGNMENT,
    zero_fill: false,
    stats: &DEFAULT_CPU_STATS,
};

/// Process-wide CPU allocator with default settings.
pub fn default_cpu_allocator() -> &'static CpuAllocator {
    &DEFAULT_CPU_ALLOCATOR
}

#[derive(Debug)]
pub struct CpuAllocator {
    alignment: usize,
    zero_fill: bool,
    stats: &'static AllocationStats,
}

/// Context of one live CPU block: what `dealloc` needs back.
struct CpuBlock {
    ptr: *mut u8,
    layout: Layout,
    stats: &'static AllocationStats,
}

unsafe fn free_cpu_block(ctx: *mut c_void) {
    // SAFETY: installed only by `CpuAllocator::allocate` with a boxed CpuBlock.
    let block = unsafe { Box::from_raw(ctx.cast::<CpuBlock>()) };
    // SAFETY: `ptr` came from `alloc` with exactly this layout.
    unsafe { alloc::dealloc(block.ptr, block.layout) };
    block.stats.record_free(block.layout.size());
}

impl CpuAllocator {
    pub const DEFAULT_ALIGNMENT: usize = 64;

    pub fn new(alignment: usize, zero_fill: bool, stats: &'static AllocationStats) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(Error::Precondition(format!(
                "CPU alignment must be a power of two, got {alignment}"
            )));
        }
        Ok(Self {
            alignment,
            zero_fill,
            stats,
        })
    }

    pub fn from_config(cfg: &MemConfig, stats: &'static AllocationStats) -> Result<Self> {
        cfg.validate()?;
        Self::new(cfg.cpu_alignment, cfg.zero_fill, stats)
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn stats(&self) -> &'static AllocationStats {
        self.stats
    }
}

impl Allocator for CpuAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        // Empty allocations own nothing.
        if nbytes == 0 {
            return Ok(DataPtr::empty(Device::cpu()));
        }
        let failed = || Error::AllocFailed {
            device: DeviceType::CPU,
            bytes: nbytes,
        };
        let layout = Layout::from_size_align(nbytes, self.alignment).map_err(|_| failed())?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe {
            if self.zero_fill {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        if ptr.is_null() {
            return Err(failed());
        }
        self.stats.record_alloc(nbytes);

        #[cfg(feature = "tracing")]
        tracing::trace!(nbytes, align = self.alignment, "cpu allocate");

        let ctx = Box::new(CpuBlock {
            ptr,
            layout,
            stats: self.stats,
        });
        // SAFETY: the context is freshly boxed and `free_cpu_block` is its
        // matching release; it frees `ptr` exactly once.
        Ok(unsafe {
            DataPtr::new(
                ptr,
                Box::into_raw(ctx).cast(),
                Some(free_cpu_block),
                Device::cpu(),
            )
        })
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::CPU
    }
}
