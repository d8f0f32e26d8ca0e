//! Allocator wrapper that enforces a hard cap on live bytes.
//!
//! Bytes are reserved before the inner allocator is asked and returned when the
//! handed-out `DataPtr` is released, so the cap holds even across threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::DeviceType;

use crate::allocator::Allocator;
use crate::data_ptr::DataPtr;
use crate::error::{Error, Result};

/// Shared inner state for the budget.
#[derive(Debug)]
struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
}

impl BudgetInner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

pub struct CappedAllocator {
    inner: &'static dyn Allocator,
    budget: Arc<BudgetInner>,
}

impl CappedAllocator {
    pub fn new(inner: &'static dyn Allocator, capacity_bytes: usize) -> Self {
        Self {
            inner,
            budget: Arc::new(BudgetInner::new(capacity_bytes)),
        }
    }

    /// Current usage (advisory).
    pub fn used_bytes(&self) -> usize {
        self.budget.used.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> usize {
        self.budget.capacity
    }
}

impl Allocator for CappedAllocator {
    fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
        if nbytes == 0 {
            return self.inner.allocate(0);
        }
        if !self.budget.try_acquire(nbytes) {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                nbytes,
                capacity = self.budget.capacity,
                used = self.used_bytes(),
                "memory cap exceeded"
            );
            return Err(Error::BudgetExceeded {
                requested: nbytes,
                capacity: self.budget.capacity,
                used: self.used_bytes(),
            });
        }
        let inner = match self.inner.allocate(nbytes) {
            Ok(dp) => dp,
            Err(e) => {
                self.budget.release(nbytes);
                return Err(e);
            }
        };
        let data = inner.get();
        let device = inner.device();
        let budget = Arc::clone(&self.budget);
        Ok(DataPtr::from_fn(
            data,
            move |_| {
                drop(inner);
                budget.release(nbytes);
            },
            device,
        ))
    }

    fn device_type(&self) -> DeviceType {
        self.inner.device_type()
    }

    unsafe fn copy_data(&self, dst: *mut u8, src: *const u8, nbytes: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.inner.copy_data(dst, src, nbytes) }
    }
}
