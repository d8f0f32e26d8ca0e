//! tessera-mem: owned memory handles, allocators, the allocator registry and
//! reference-counted storage.
//!
//! Control flow: resolve an [`Allocator`] for a device from the
//! [`AllocatorRegistry`], allocate a [`DataPtr`], and wrap it in a
//! [`Storage`]. Storages can be cloned freely; the memory is released when the
//! last clone drops.
//!
//! Unlike `tessera-core`, this crate needs `unsafe`: raw data pointers, release
//! functions and the untracked-storage escape hatch all live here.

pub mod allocator;
pub mod capped;
pub mod cpu;
pub mod data_ptr;
pub mod error;
pub mod registry;
pub mod storage;
pub mod storage_impl;
pub mod tracking;

pub use allocator::{same_allocator, Allocator};
pub use capped::CappedAllocator;
pub use cpu::{default_cpu_allocator, CpuAllocator};
pub use data_ptr::{DataPtr, DeleterFn};
pub use error::{Error, Result};
pub use registry::{
    get_allocator, global_registry, init_allocators, init_allocators_in, set_allocator,
    AllocatorRegistry,
};
pub use storage::{ShareRejected, Storage, UntrackedStorageImpl};
pub use storage_impl::StorageImpl;
pub use tracking::{AllocationStats, PeakTracker};
