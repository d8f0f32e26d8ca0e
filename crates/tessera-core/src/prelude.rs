//! Convenient re-exports for downstream crates.

pub use crate::backend::{Backend, Layout};
pub use crate::config::MemConfig;
pub use crate::device::{Device, DeviceType};
pub use crate::dispatch_key::DispatchKey;
pub use crate::error::{Error, Result};
pub use crate::key_set::DispatchKeySet;
