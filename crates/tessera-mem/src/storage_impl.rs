//! `StorageImpl`: a resizable byte buffer owning exactly one `DataPtr`.
//!
//! Storages are shared through `Arc` (see [`Storage`](crate::storage::Storage)).
//! Metadata (the handle, byte size, resizable flag and allocator) sits behind a
//! mutex so any owner may swap it; the bytes themselves are not synchronized.
//!
//! Invariants: a resizable storage always has an allocator, and the owned
//! handle is valid for at least `nbytes` bytes (or is null). `resize` copies
//! out of the old block on the strength of the second one, so every entry
//! point that records a handle or a size without allocating it is `unsafe`.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_core::{Device, DeviceType};

use crate::allocator::Allocator;
use crate::data_ptr::{DataPtr, DeleterFn};
use crate::error::{Error, Result};

struct State {
    data_ptr: DataPtr,
    nbytes: usize,
    resizable: bool,
    allocator: Option<&'static dyn Allocator>,
}

pub struct StorageImpl {
    state: Mutex<State>,
}

impl StorageImpl {
    /// Allocate `nbytes` from `allocator` and own the result.
    pub fn new(nbytes: usize, allocator: &'static dyn Allocator, resizable: bool) -> Result<Self> {
        let data_ptr = allocator.allocate(nbytes)?;
        Self::from_parts(nbytes, data_ptr, Some(allocator), resizable)
    }

    /// Take ownership of an existing handle. `allocator` is only used for
    /// future resizes and may be `None` for a fixed-size storage.
    ///
    /// # Safety
    ///
    /// `data_ptr` must be null or valid for reads of `nbytes` bytes for as
    /// long as the storage owns it.
    pub unsafe fn with_data_ptr(
        nbytes: usize,
        data_ptr: DataPtr,
        allocator: Option<&'static dyn Allocator>,
        resizable: bool,
    ) -> Result<Self> {
        Self::from_parts(nbytes, data_ptr, allocator, resizable)
    }

    /// Caller has established that `data_ptr` covers `nbytes`.
    pub(crate) fn from_parts(
        nbytes: usize,
        data_ptr: DataPtr,
        allocator: Option<&'static dyn Allocator>,
        resizable: bool,
    ) -> Result<Self> {
        if resizable && allocator.is_none() {
            return Err(Error::Precondition(
                "a resizable storage must be given an allocator".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(State {
                data_ptr,
                nbytes,
                resizable,
                allocator,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Nothing panics while the lock is held except allocator callbacks in
        // `resize`, which run before any field is written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw data pointer. Null for an empty or released storage.
    pub fn data(&self) -> *mut u8 {
        self.state().data_ptr.get()
    }

    pub fn nbytes(&self) -> usize {
        self.state().nbytes
    }

    /// Overwrite the recorded size without reallocating.
    ///
    /// # Safety
    ///
    /// The owned handle must be null or valid for reads of `nbytes` bytes.
    pub unsafe fn set_nbytes(&self, nbytes: usize) {
        self.state().nbytes = nbytes;
    }

    pub fn resizable(&self) -> bool {
        self.state().resizable
    }

    pub fn set_resizable(&self, resizable: bool) -> Result<()> {
        let mut state = self.state();
        if resizable && state.allocator.is_none() {
            return Err(Error::Precondition(
                "cannot make a storage resizable without an allocator".into(),
            ));
        }
        state.resizable = resizable;
        Ok(())
    }

    pub fn allocator(&self) -> Option<&'static dyn Allocator> {
        self.state().allocator
    }

    /// Override the allocator used for future reallocations. Clearing it on a
    /// resizable storage is refused.
    pub fn set_allocator(&self, allocator: Option<&'static dyn Allocator>) -> Result<()> {
        let mut state = self.state();
        if allocator.is_none() && state.resizable {
            return Err(Error::Precondition(
                "cannot drop the allocator of a resizable storage".into(),
            ));
        }
        state.allocator = allocator;
        Ok(())
    }

    pub fn device(&self) -> Device {
        self.state().data_ptr.device()
    }

    pub fn device_type(&self) -> DeviceType {
        self.device().device_type()
    }

    /// Run `f` against the owned handle.
    pub fn with_data_ptr_ref<R>(&self, f: impl FnOnce(&DataPtr) -> R) -> R {
        f(&self.state().data_ptr)
    }

    /// Swap in a new handle and hand the previous one back to the caller.
    /// Any owner may do this. The recorded size is left alone.
    ///
    /// # Safety
    ///
    /// `data_ptr` must be null or valid for reads of the storage's current
    /// `nbytes` bytes for as long as the storage owns it.
    pub unsafe fn set_data_ptr(&self, data_ptr: DataPtr) -> DataPtr {
        std::mem::replace(&mut self.state().data_ptr, data_ptr)
    }

    /// Release the owned memory now rather than when the last owner drops.
    /// Keeps the device tag; a second call does nothing.
    pub fn release_resources(&self) {
        let released = {
            let mut state = self.state();
            let device = state.data_ptr.device();
            std::mem::replace(&mut state.data_ptr, DataPtr::empty(device))
        };
        drop(released);
    }

    /// Reallocate to `new_nbytes` through the stored allocator, keeping the
    /// first `min(old, new)` bytes.
    pub fn resize(&self, new_nbytes: usize) -> Result<()> {
        let old = {
            let mut state = self.state();
            let allocator = match (state.resizable, state.allocator) {
                (true, Some(a)) => a,
                _ => {
                    return Err(Error::Precondition(
                        "trying to resize a storage that is not resizable".into(),
                    ))
                }
            };
            let fresh = allocator.allocate(new_nbytes)?;
            let keep = state.nbytes.min(new_nbytes);
            if keep > 0 && !state.data_ptr.is_null() && !fresh.is_null() {
                // SAFETY: the old block holds at least `nbytes` bytes, the new
                // one `new_nbytes`, and they are distinct allocations.
                unsafe { allocator.copy_data(fresh.get(), state.data_ptr.get(), keep) };
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(from = state.nbytes, to = new_nbytes, "storage resized");

            state.nbytes = new_nbytes;
            std::mem::replace(&mut state.data_ptr, fresh)
        };
        drop(old);
        Ok(())
    }

    /// Adopt caller-owned memory. The storage becomes fixed-size: there is no
    /// known allocator to grow it with. `deleter`, if any, is called with
    /// `data` when the storage lets go of it.
    ///
    /// Exclusive access is enforced by `&mut self`; through a shared
    /// [`Storage`](crate::storage::Storage) use its checked counterpart.
    ///
    /// # Safety
    ///
    /// `data` must be valid for `nbytes` bytes until released, and `deleter`
    /// must be sound to call once with `data` from any thread.
    pub unsafe fn share_external_pointer(
        &mut self,
        data: *mut u8,
        nbytes: usize,
        deleter: Option<DeleterFn>,
    ) {
        let device = self.state_mut().data_ptr.device();
        // SAFETY: forwarded to the caller.
        let data_ptr = unsafe { DataPtr::from_raw(data, deleter, device) };
        // SAFETY: `data` covers `nbytes`, per the caller.
        unsafe { self.share_external_data_ptr(data_ptr, nbytes) };
    }

    /// Adopt an already-owned handle; see [`StorageImpl::share_external_pointer`].
    ///
    /// # Safety
    ///
    /// `data_ptr` must be null or valid for reads of `nbytes` bytes for as
    /// long as the storage owns it. An allocator installed later may resize
    /// from it.
    pub unsafe fn share_external_data_ptr(&mut self, data_ptr: DataPtr, nbytes: usize) {
        let state = self.state_mut();
        #[cfg(feature = "tracing")]
        tracing::debug!(old = state.nbytes, new = nbytes, "storage adopted external memory");
        let old = std::mem::replace(&mut state.data_ptr, data_ptr);
        state.nbytes = nbytes;
        state.allocator = None;
        state.resizable = false;
        drop(old);
    }
}

impl fmt::Debug for StorageImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("StorageImpl")
            .field("data_ptr", &state.data_ptr)
            .field("nbytes", &state.nbytes)
            .field("resizable", &state.resizable)
            .field("has_allocator", &state.allocator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::same_allocator;
    use crate::cpu::{default_cpu_allocator, CpuAllocator};
    use crate::tracking::AllocationStats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tracked_cpu() -> &'static CpuAllocator {
        let stats = Box::leak(Box::new(AllocationStats::new()));
        Box::leak(Box::new(CpuAllocator::new(64, true, stats).unwrap()))
    }

    #[test]
    fn allocate_now_reports_size_and_flags() {
        let a = default_cpu_allocator();
        let s = StorageImpl::new(1024, a, true).unwrap();
        assert_eq!(s.nbytes(), 1024);
        assert!(s.resizable());
        assert!(same_allocator(s.allocator().unwrap(), a));
        assert!(!s.data().is_null());
        assert_eq!(s.device_type(), DeviceType::CPU);
    }

    #[test]
    fn resizable_requires_allocator() {
        // SAFETY: null handles cover zero bytes.
        let err =
            unsafe { StorageImpl::with_data_ptr(0, DataPtr::empty(Device::cpu()), None, true) }
                .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));

        // SAFETY: as above.
        let s =
            unsafe { StorageImpl::with_data_ptr(0, DataPtr::empty(Device::cpu()), None, false) }
                .unwrap();
        assert!(matches!(s.set_resizable(true), Err(Error::Precondition(_))));
        assert!(!s.resizable());
        assert!(s.set_resizable(false).is_ok());
    }

    #[test]
    fn cannot_drop_allocator_while_resizable() {
        let s = StorageImpl::new(8, default_cpu_allocator(), true).unwrap();
        assert!(s.set_allocator(None).is_err());
        s.set_resizable(false).unwrap();
        s.set_allocator(None).unwrap();
        assert!(s.allocator().is_none());
    }

    #[test]
    fn set_data_ptr_returns_previous() {
        let s = StorageImpl::new(16, default_cpu_allocator(), false).unwrap();
        let before = s.data();
        // SAFETY: a null handle.
        let old = unsafe { s.set_data_ptr(DataPtr::empty(Device::cpu())) };
        assert_eq!(old.get(), before);
        assert!(s.data().is_null());
    }

    #[test]
    fn with_data_ptr_ref_sees_owned_handle() {
        let s = StorageImpl::new(16, default_cpu_allocator(), false).unwrap();
        let (data, device) = s.with_data_ptr_ref(|dp| (dp.get(), dp.device()));
        assert_eq!(data, s.data());
        assert_eq!(device, Device::cpu());
    }

    /// Delegates to the default CPU allocator and remembers the last copy.
    struct Recording {
        last_copy: AtomicUsize,
    }

    impl Allocator for Recording {
        fn allocate(&self, nbytes: usize) -> Result<DataPtr> {
            default_cpu_allocator().allocate(nbytes)
        }
        fn device_type(&self) -> DeviceType {
            DeviceType::CPU
        }
        unsafe fn copy_data(&self, dst: *mut u8, src: *const u8, nbytes: usize) {
            self.last_copy.store(nbytes, Ordering::SeqCst);
            // SAFETY: upheld by the caller.
            unsafe { std::ptr::copy_nonoverlapping(src, dst, nbytes) };
        }
    }

    #[test]
    fn resize_copies_at_most_the_source_block() {
        let a: &'static Recording = Box::leak(Box::new(Recording {
            last_copy: AtomicUsize::new(usize::MAX),
        }));
        let s = StorageImpl::new(4, a, true).unwrap();

        s.resize(1 << 20).unwrap();
        assert_eq!(a.last_copy.load(Ordering::SeqCst), 4);

        // SAFETY: the block holds 1 MiB; recording less is always covered.
        unsafe { s.set_nbytes(2) };
        s.resize(64).unwrap();
        assert_eq!(a.last_copy.load(Ordering::SeqCst), 2);

        // A released block is never read, whatever size is recorded.
        a.last_copy.store(usize::MAX, Ordering::SeqCst);
        s.release_resources();
        s.resize(128).unwrap();
        assert_eq!(a.last_copy.load(Ordering::SeqCst), usize::MAX);
        assert_eq!(s.nbytes(), 128);
    }

    #[test]
    fn release_resources_frees_early_and_is_idempotent() {
        let a = tracked_cpu();
        let s = StorageImpl::new(512, a, true).unwrap();
        assert_eq!(a.stats().live_bytes(), 512);
        s.release_resources();
        assert_eq!(a.stats().live_bytes(), 0);
        assert!(s.data().is_null());
        s.release_resources();
        assert_eq!(s.device(), Device::cpu());
    }

    #[test]
    fn resize_keeps_prefix() {
        let a = tracked_cpu();
        let s = StorageImpl::new(4, a, true).unwrap();
        // SAFETY: 4 bytes allocated above; no other owner.
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), s.data(), 4) };

        s.resize(8).unwrap();
        assert_eq!(s.nbytes(), 8);
        // SAFETY: resized to 8 zero-filled bytes.
        let bytes = unsafe { std::slice::from_raw_parts(s.data(), 8) };
        assert_eq!(bytes, &[1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(a.stats().live_bytes(), 8);

        s.resize(2).unwrap();
        // SAFETY: 2 bytes remain.
        let bytes = unsafe { std::slice::from_raw_parts(s.data(), 2) };
        assert_eq!(bytes, &[1, 2]);

        s.resize(0).unwrap();
        assert!(s.data().is_null());
        assert_eq!(a.stats().live_bytes(), 0);
    }

    #[test]
    fn resize_refused_when_fixed() {
        let s = StorageImpl::new(4, default_cpu_allocator(), false).unwrap();
        assert!(matches!(s.resize(8), Err(Error::Precondition(_))));
        assert_eq!(s.nbytes(), 4);
    }

    static EXTERNAL_FREES: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_free(_ctx: *mut std::ffi::c_void) {
        EXTERNAL_FREES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn share_external_pointer_freezes_storage() {
        let a = tracked_cpu();
        let mut s = StorageImpl::new(64, a, true).unwrap();
        let mut external = [0u8; 32];
        // SAFETY: `external` outlives `s`; the deleter only counts.
        unsafe { s.share_external_pointer(external.as_mut_ptr(), 32, Some(count_free)) };

        assert_eq!(a.stats().live_bytes(), 0);
        assert_eq!(s.nbytes(), 32);
        assert_eq!(s.data(), external.as_mut_ptr());
        assert!(!s.resizable());
        assert!(s.allocator().is_none());
        assert!(s.set_resizable(true).is_err());

        drop(s);
        assert_eq!(EXTERNAL_FREES.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_storage_releases_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let dp = DataPtr::from_fn(
            std::ptr::null_mut(),
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
            Device::cpu(),
        );
        // SAFETY: zero bytes recorded.
        let s = unsafe { StorageImpl::with_data_ptr(0, dp, None, false) }.unwrap();
        s.release_resources();
        drop(s);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
