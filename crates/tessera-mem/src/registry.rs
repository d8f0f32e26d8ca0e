//! Per-device allocator registry.
//!
//! One slot per device type holds an allocator reference and the priority it
//! was registered with. A registration wins when its priority is greater than
//! *or equal to* the stored one, so the last registrant at a given priority
//! replaces earlier ones.
//!
//! The global registry is meant to be filled during single-threaded startup
//! and read afterwards. Each slot has its own lock so reads and writes never
//! alias, but concurrent registrations for one device still race: whichever
//! compare-and-store runs last decides the slot. Callers that re-register at
//! runtime must order those calls themselves.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use tessera_core::{DeviceType, MemConfig, COMPILE_TIME_MAX_DEVICE_TYPES};

use crate::allocator::Allocator;
use crate::capped::CappedAllocator;
use crate::cpu::CpuAllocator;
use crate::error::{Error, Result};
use crate::tracking::AllocationStats;

#[derive(Clone, Copy)]
struct Slot {
    allocator: Option<&'static dyn Allocator>,
    priority: u8,
}

impl Slot {
    const EMPTY: Slot = Slot {
        allocator: None,
        priority: 0,
    };
}

pub struct AllocatorRegistry {
    slots: [RwLock<Slot>; COMPILE_TIME_MAX_DEVICE_TYPES],
}

impl AllocatorRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| RwLock::new(Slot::EMPTY)),
        }
    }

    fn slot(&self, device_type: DeviceType) -> Slot {
        *self.slots[device_type.ordinal()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `allocator` for `device_type` unless a higher-priority one is
    /// already there. Lower-priority registrations are silently ignored.
    pub fn register(&self, device_type: DeviceType, allocator: &'static dyn Allocator, priority: u8) {
        let mut slot = self.slots[device_type.ordinal()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if priority >= slot.priority {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                device = %device_type,
                priority,
                previous = slot.priority,
                replaced = slot.allocator.is_some(),
                "allocator registered"
            );
            *slot = Slot {
                allocator: Some(allocator),
                priority,
            };
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                device = %device_type,
                priority,
                stored = slot.priority,
                "allocator registration ignored (lower priority)"
            );
        }
    }

    /// The allocator for `device_type`. Asking for a device nobody configured
    /// is a caller bug and yields `NotRegistered`.
    pub fn resolve(&self, device_type: DeviceType) -> Result<&'static dyn Allocator> {
        self.slot(device_type)
            .allocator
            .ok_or(Error::NotRegistered {
                device: device_type,
            })
    }

    pub fn is_registered(&self, device_type: DeviceType) -> bool {
        self.slot(device_type).allocator.is_some()
    }

    /// Priority of the current registration (0 when empty).
    pub fn priority(&self, device_type: DeviceType) -> u8 {
        self.slot(device_type).priority
    }
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AllocatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for device_type in DeviceType::ALL {
            let slot = self.slot(device_type);
            list.entry(
                &device_type.name(true),
                &(slot.allocator.is_some(), slot.priority),
            );
        }
        list.finish()
    }
}

static GLOBAL_REGISTRY: Lazy<AllocatorRegistry> = Lazy::new(AllocatorRegistry::new);

/// The process-wide registry.
pub fn global_registry() -> &'static AllocatorRegistry {
    &GLOBAL_REGISTRY
}

/// Register into the process-wide registry.
pub fn set_allocator(device_type: DeviceType, allocator: &'static dyn Allocator, priority: u8) {
    GLOBAL_REGISTRY.register(device_type, allocator, priority);
}

/// Resolve from the process-wide registry.
pub fn get_allocator(device_type: DeviceType) -> Result<&'static dyn Allocator> {
    GLOBAL_REGISTRY.resolve(device_type)
}

/// Build the CPU allocator described by `cfg` and register it in `registry`.
/// The allocator (and its stats) live for the rest of the process.
pub fn init_allocators_in(
    registry: &AllocatorRegistry,
    cfg: &MemConfig,
) -> Result<&'static dyn Allocator> {
    cfg.validate()?;
    let stats: &'static AllocationStats = Box::leak(Box::new(AllocationStats::new()));
    let cpu: &'static CpuAllocator = Box::leak(Box::new(CpuAllocator::from_config(cfg, stats)?));
    let allocator: &'static dyn Allocator = match cfg.mem_cap_bytes {
        Some(cap) => Box::leak(Box::new(CappedAllocator::new(cpu, cap))),
        None => cpu,
    };
    registry.register(DeviceType::CPU, allocator, cfg.cpu_allocator_priority);
    Ok(allocator)
}

/// [`init_allocators_in`] against the process-wide registry.
pub fn init_allocators(cfg: &MemConfig) -> Result<&'static dyn Allocator> {
    init_allocators_in(global_registry(), cfg)
}
