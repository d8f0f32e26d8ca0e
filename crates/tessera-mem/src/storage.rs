//! `Storage`: shared handle to a [`StorageImpl`].
//!
//! Cloning a `Storage` adds an owner; the underlying buffer and its memory go
//! away when the last owner drops. Accessors delegate to the shared impl.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use tessera_core::{Device, DeviceType};

use crate::allocator::Allocator;
use crate::data_ptr::{DataPtr, DeleterFn};
use crate::error::{Error, Result};
use crate::registry::{global_registry, AllocatorRegistry};
use crate::storage_impl::StorageImpl;

#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageImpl>,
}

impl Storage {
    /// Allocate `nbytes` with `allocator` and wrap the result.
    pub fn new(nbytes: usize, allocator: &'static dyn Allocator, resizable: bool) -> Result<Self> {
        Ok(Self::from_impl(StorageImpl::new(nbytes, allocator, resizable)?))
    }

    /// Wrap pre-allocated memory. The allocator is kept for future
    /// reallocations and may be `None` when the storage is not resizable.
    ///
    /// # Safety
    ///
    /// Same contract as [`StorageImpl::with_data_ptr`]: `data_ptr` is null or
    /// valid for reads of `nbytes` bytes while the storage owns it.
    pub unsafe fn with_data_ptr(
        nbytes: usize,
        data_ptr: DataPtr,
        allocator: Option<&'static dyn Allocator>,
        resizable: bool,
    ) -> Result<Self> {
        // SAFETY: forwarded to the caller.
        let storage_impl =
            unsafe { StorageImpl::with_data_ptr(nbytes, data_ptr, allocator, resizable) }?;
        Ok(Self::from_impl(storage_impl))
    }

    pub fn from_impl(storage_impl: StorageImpl) -> Self {
        Self {
            inner: Arc::new(storage_impl),
        }
    }

    pub fn from_arc(inner: Arc<StorageImpl>) -> Self {
        Self { inner }
    }

    /// Empty, resizable storage on `device`, using the allocator registered
    /// for its type in the process-wide registry.
    pub fn create_legacy(device: Device) -> Result<Self> {
        Self::create_legacy_in(global_registry(), device)
    }

    /// [`Storage::create_legacy`] against an explicit registry. Nothing is
    /// allocated if the device has no allocator.
    pub fn create_legacy_in(registry: &AllocatorRegistry, device: Device) -> Result<Self> {
        let allocator = registry.resolve(device.device_type())?;
        let data_ptr = allocator.allocate(0)?;
        Ok(Self::from_impl(StorageImpl::from_parts(
            0,
            data_ptr,
            Some(allocator),
            true,
        )?))
    }

    pub fn storage_impl(&self) -> &StorageImpl {
        &self.inner
    }

    pub fn data(&self) -> *mut u8 {
        self.inner.data()
    }

    pub fn nbytes(&self) -> usize {
        self.inner.nbytes()
    }

    /// # Safety
    ///
    /// See [`StorageImpl::set_nbytes`].
    pub unsafe fn set_nbytes(&self, nbytes: usize) {
        // SAFETY: forwarded to the caller.
        unsafe { self.inner.set_nbytes(nbytes) };
    }

    pub fn resizable(&self) -> bool {
        self.inner.resizable()
    }

    pub fn set_resizable(&self, resizable: bool) -> Result<()> {
        self.inner.set_resizable(resizable)
    }

    pub fn allocator(&self) -> Option<&'static dyn Allocator> {
        self.inner.allocator()
    }

    pub fn device(&self) -> Device {
        self.inner.device()
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.device_type()
    }

    /// Swap the owned handle, returning the previous one.
    ///
    /// # Safety
    ///
    /// See [`StorageImpl::set_data_ptr`].
    pub unsafe fn set_data_ptr(&self, data_ptr: DataPtr) -> DataPtr {
        // SAFETY: forwarded to the caller.
        unsafe { self.inner.set_data_ptr(data_ptr) }
    }

    pub fn resize(&self, nbytes: usize) -> Result<()> {
        self.inner.resize(nbytes)
    }

    pub fn release_resources(&self) {
        self.inner.release_resources();
    }

    /// Number of owners of the underlying storage, this handle included.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn is_unique(&self) -> bool {
        self.use_count() == 1
    }

    /// True iff both handles point at the same storage (identity, not contents).
    pub fn is_alias_of(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn unique_impl(&mut self) -> Result<&mut StorageImpl> {
        let use_count = Arc::strong_count(&self.inner);
        Arc::get_mut(&mut self.inner).ok_or(Error::NotUnique { use_count })
    }

    /// Adopt caller-owned memory and freeze the storage (no allocator, not
    /// resizable). Fails with `NotUnique`, changing nothing, unless this
    /// handle is the only owner.
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
    ) -> Result<()> {
        let storage_impl = self.unique_impl()?;
        // SAFETY: forwarded to the caller.
        unsafe { storage_impl.share_external_pointer(data, nbytes, deleter) };
        Ok(())
    }

    /// Adopt an owned handle and freeze the storage. On `NotUnique` neither
    /// the storage nor the handle is touched; the handle comes back in the
    /// error so the caller can retry once the other owners are gone.
    ///
    /// # Safety
    ///
    /// See [`StorageImpl::share_external_data_ptr`].
    pub unsafe fn share_external_data_ptr(
        &mut self,
        data_ptr: DataPtr,
        nbytes: usize,
    ) -> std::result::Result<(), ShareRejected> {
        match self.unique_impl() {
            Ok(storage_impl) => {
                // SAFETY: forwarded to the caller.
                unsafe { storage_impl.share_external_data_ptr(data_ptr, nbytes) };
                Ok(())
            }
            Err(error) => Err(ShareRejected { error, data_ptr }),
        }
    }

    /// Stop counting this handle. The returned token still holds its share of
    /// ownership; the storage stays alive until the token is reclaimed and the
    /// resulting `Storage` dropped.
    pub fn release_ownership_unsafely(self) -> UntrackedStorageImpl {
        // SAFETY: Arc::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Arc::into_raw(self.inner).cast_mut()) };
        UntrackedStorageImpl { ptr }
    }
}

impl From<StorageImpl> for Storage {
    fn from(storage_impl: StorageImpl) -> Self {
        Storage::from_impl(storage_impl)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("nbytes", &self.nbytes())
            .field("resizable", &self.resizable())
            .field("device", &self.device())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// A handle [`Storage::share_external_data_ptr`] refused to adopt, handed back
/// with the reason.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ShareRejected {
    pub error: Error,
    pub data_ptr: DataPtr,
}

impl From<ShareRejected> for Error {
    fn from(rejected: ShareRejected) -> Self {
        rejected.error
    }
}

/// One owner's share of a storage, detached from automatic counting.
///
/// Dropping the token leaks that share; hand it back with
/// [`UntrackedStorageImpl::reclaim`].
#[must_use = "dropping an untracked storage leaks it"]
pub struct UntrackedStorageImpl {
    ptr: NonNull<StorageImpl>,
}

// SAFETY: the token is an Arc share in disguise; StorageImpl is Send + Sync.
unsafe impl Send for UntrackedStorageImpl {}
// SAFETY: as above.
unsafe impl Sync for UntrackedStorageImpl {}

impl UntrackedStorageImpl {
    pub fn as_ptr(&self) -> *const StorageImpl {
        self.ptr.as_ptr()
    }

    /// Borrow the storage.
    ///
    /// # Safety
    ///
    /// The token must not have been duplicated and reclaimed elsewhere; the
    /// borrow must end before the token is reclaimed.
    pub unsafe fn get<'a>(&self) -> &'a StorageImpl {
        // SAFETY: the share held by this token keeps the storage alive.
        unsafe { self.ptr.as_ref() }
    }

    /// Resume counted ownership.
    ///
    /// # Safety
    ///
    /// Call at most once per share released by
    /// [`Storage::release_ownership_unsafely`].
    pub unsafe fn reclaim(self) -> Storage {
        // SAFETY: pointer came from Arc::into_raw and its share is unclaimed.
        let inner = unsafe { Arc::from_raw(self.ptr.as_ptr().cast_const()) };
        Storage { inner }
    }
}

impl fmt::Debug for UntrackedStorageImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UntrackedStorageImpl").field(&self.ptr).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::same_allocator;
    use crate::cpu::{default_cpu_allocator, CpuAllocator};
    use crate::tracking::AllocationStats;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cpu_registry() -> AllocatorRegistry {
        let r = AllocatorRegistry::new();
        r.register(DeviceType::CPU, default_cpu_allocator(), 0);
        r
    }

    #[test]
    fn aliases_share_one_impl() {
        let h1 = Storage::new(64, default_cpu_allocator(), true).unwrap();
        assert!(h1.is_unique());
        let h2 = h1.clone();
        assert!(!h1.is_unique());
        assert!(h1.is_alias_of(&h2));
        assert_eq!(h1.use_count(), 2);
        assert_eq!(h1.data(), h2.data());

        let other = Storage::new(64, default_cpu_allocator(), true).unwrap();
        assert!(!h1.is_alias_of(&other));
    }

    #[test]
    fn share_external_requires_unique() {
        let mut h1 = Storage::new(16, default_cpu_allocator(), true).unwrap();
        let h2 = h1.clone();

        // SAFETY: null handles are never read.
        let rejected = unsafe { h1.share_external_data_ptr(DataPtr::empty(Device::cpu()), 8) }
            .unwrap_err();
        assert!(matches!(rejected.error, Error::NotUnique { use_count: 2 }));
        assert!(rejected.error.is_contract_violation());
        assert_eq!(h2.nbytes(), 16);
        assert!(h2.resizable());

        drop(h2);
        // SAFETY: as above.
        unsafe { h1.share_external_data_ptr(rejected.data_ptr, 8) }.unwrap();
        assert_eq!(h1.nbytes(), 8);
        assert!(!h1.resizable());
        assert!(h1.allocator().is_none());
    }

    #[test]
    fn set_data_ptr_visible_through_aliases() {
        let h1 = Storage::new(16, default_cpu_allocator(), false).unwrap();
        let h2 = h1.clone();
        // SAFETY: a null handle.
        let old = unsafe { h2.set_data_ptr(DataPtr::empty(Device::cpu())) };
        assert!(!old.is_null());
        assert!(h1.data().is_null());
    }

    #[test]
    fn create_legacy_uses_registered_allocator() {
        let r = cpu_registry();
        let s = Storage::create_legacy_in(&r, Device::cpu()).unwrap();
        assert_eq!(s.nbytes(), 0);
        assert!(s.resizable());
        assert!(same_allocator(s.allocator().unwrap(), default_cpu_allocator()));
        s.resize(32).unwrap();
        assert_eq!(s.nbytes(), 32);
    }

    #[test]
    fn create_legacy_unregistered_device_allocates_nothing() {
        let stats: &'static AllocationStats = Box::leak(Box::new(AllocationStats::new()));
        let a: &'static CpuAllocator =
            Box::leak(Box::new(CpuAllocator::new(64, false, stats).unwrap()));
        let r = AllocatorRegistry::new();
        r.register(DeviceType::CPU, a, 0);

        let fpga = Device::new(DeviceType::FPGA, Some(0)).unwrap();
        let err = Storage::create_legacy_in(&r, fpga).unwrap_err();
        assert!(matches!(
            err,
            Error::NotRegistered {
                device: DeviceType::FPGA
            }
        ));
        assert_eq!(stats.allocations(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn rejected_share_hands_back_the_caller_memory() {
        let freed = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&freed);
        let mut backing = vec![0u8; 8];
        let dp = DataPtr::from_fn(
            backing.as_mut_ptr(),
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
            Device::cpu(),
        );
        let mut h1 = Storage::new(4, default_cpu_allocator(), true).unwrap();
        let h2 = h1.clone();

        // SAFETY: `backing` holds 8 bytes and outlives both storages.
        let rejected = unsafe { h1.share_external_data_ptr(dp, 8) }.unwrap_err();
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        assert_eq!(rejected.data_ptr.get(), backing.as_mut_ptr());
        let err: Error = rejected.into();
        assert!(matches!(err, Error::NotUnique { use_count: 2 }));
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        drop(h2);
    }

    #[test]
    fn from_arc_shares_the_given_impl() {
        let inner = Arc::new(StorageImpl::new(8, default_cpu_allocator(), false).unwrap());
        let s = Storage::from_arc(Arc::clone(&inner));
        assert_eq!(s.use_count(), 2);
        assert!(std::ptr::eq(s.storage_impl(), &*inner));
    }

    #[test]
    fn untracked_round_trip() {
        let stats: &'static AllocationStats = Box::leak(Box::new(AllocationStats::new()));
        let a: &'static CpuAllocator =
            Box::leak(Box::new(CpuAllocator::new(64, false, stats).unwrap()));
        let h1 = Storage::new(128, a, true).unwrap();
        let h2 = h1.clone();

        let raw = h1.release_ownership_unsafely();
        assert_eq!(h2.use_count(), 2);
        // SAFETY: token not reclaimed yet.
        assert_eq!(unsafe { raw.get() }.nbytes(), 128);
        assert_eq!(raw.as_ptr(), h2.storage_impl() as *const StorageImpl);

        drop(h2);
        assert_eq!(stats.live_bytes(), 128);

        // SAFETY: the only reclaim of this share.
        let back = unsafe { raw.reclaim() };
        assert!(back.is_unique());
        drop(back);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn handles_cross_threads() {
        let h = Storage::new(8, default_cpu_allocator(), true).unwrap();
        let joins: Vec<_> = (0..4)
            .map(|_| {
                let h = h.clone();
                std::thread::spawn(move || h.nbytes())
            })
            .collect();
        for j in joins {
            assert_eq!(j.join().unwrap(), 8);
        }
        assert!(h.is_unique());
    }
}
