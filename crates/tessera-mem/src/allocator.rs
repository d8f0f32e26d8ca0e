//! The `Allocator` capability.
//!
//! An allocator hands out [`DataPtr`]s for a byte count. Allocators are not
//! owned by the registry or by storages: both keep `&'static` references, so
//! allocators are statics or leaked at startup.

use tessera_core::DeviceType;

use crate::data_ptr::DataPtr;
use crate::error::Result;

pub trait Allocator: Send + Sync {
    /// Allocate exactly `nbytes` on this allocator's device. Ownership of the
    /// returned handle passes to the caller.
    ///
    /// Failure here is a resource failure (`AllocFailed` / `BudgetExceeded`),
    /// never a contract violation.
    fn allocate(&self, nbytes: usize) -> Result<DataPtr>;

    fn device_type(&self) -> DeviceType;

    /// Copy bytes between two blocks owned by this allocator.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `nbytes` reads, `dst` for `nbytes` writes, and
    /// the ranges must not overlap.
    unsafe fn copy_data(&self, dst: *mut u8, src: *const u8, nbytes: usize) {
        if nbytes > 0 {
            // SAFETY: upheld by the caller.
            unsafe { std::ptr::copy_nonoverlapping(src, dst, nbytes) };
        }
    }
}

/// Identity comparison of two allocator references.
pub fn same_allocator(a: &dyn Allocator, b: &dyn Allocator) -> bool {
    std::ptr::eq(
        a as *const dyn Allocator as *const (),
        b as *const dyn Allocator as *const (),
    )
}
