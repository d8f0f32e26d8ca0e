//! Tessera: allocator registry, dispatch key sets and reference-counted
//! storage for a tensor runtime.
//!
//! This crate only re-exports the workspace members; see `tessera-core` for
//! plain-data types and `tessera-mem` for memory ownership.

pub use tessera_core;
pub use tessera_mem;

pub use tessera_core::{
    Backend, Device, DeviceType, DispatchKey, DispatchKeySet, Layout, MemConfig,
};
pub use tessera_mem::{
    get_allocator, init_allocators, set_allocator, Allocator, AllocatorRegistry, CpuAllocator,
    DataPtr, Storage, StorageImpl,
};
