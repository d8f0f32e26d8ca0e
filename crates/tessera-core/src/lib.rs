#![forbid(unsafe_code)]
//! tessera-core: dispatch keys, key sets, device identity and configuration.
//!
//! Everything here is plain data. Allocation, owned memory and storage live in
//! `tessera-mem`, which builds on the device identity defined here.

pub mod backend;
pub mod config;
pub mod device;
pub mod dispatch_key;
pub mod error;
pub mod key_set;
pub mod prelude;

pub use backend::{Backend, Layout};
pub use config::MemConfig;
pub use device::{Device, DeviceIndex, DeviceType, COMPILE_TIME_MAX_DEVICE_TYPES};
pub use dispatch_key::{DispatchKey, NUM_DISPATCH_KEYS};
pub use error::{Error, Result};
pub use key_set::{legacy_extract_dispatch_key, DispatchKeySet};
