//! Legacy `Backend` and `Layout` lookup tables.
//!
//! A backend is roughly (device type, layout), restricted to combinations that
//! have kernels. New code should speak `DispatchKey`; these mappers exist for
//! callers that still think in backends.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceType;
use crate::dispatch_key::DispatchKey;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    CPU,
    SparseCPU,
    FPGA,
    Undefined,
}

impl Backend {
    pub fn to_sparse(self) -> Result<Backend> {
        match self {
            Backend::CPU | Backend::SparseCPU => Ok(Backend::SparseCPU),
            other => Err(Error::UnknownBackend(format!("{other} has no sparse variant"))),
        }
    }

    pub fn to_dense(self) -> Result<Backend> {
        match self {
            Backend::CPU | Backend::SparseCPU => Ok(Backend::CPU),
            Backend::FPGA => Ok(Backend::FPGA),
            Backend::Undefined => Err(Error::UnknownBackend("Undefined".into())),
        }
    }

    pub fn from_dispatch_key(key: DispatchKey) -> Result<Backend> {
        match key {
            DispatchKey::CPU => Ok(Backend::CPU),
            DispatchKey::SparseCPU => Ok(Backend::SparseCPU),
            DispatchKey::FPGA => Ok(Backend::FPGA),
            DispatchKey::Undefined => Ok(Backend::Undefined),
            other => Err(Error::UnknownBackend(format!(
                "unrecognized dispatch key: {other}"
            ))),
        }
    }

    pub const fn to_dispatch_key(self) -> DispatchKey {
        match self {
            Backend::CPU => DispatchKey::CPU,
            Backend::SparseCPU => DispatchKey::SparseCPU,
            Backend::FPGA => DispatchKey::FPGA,
            Backend::Undefined => DispatchKey::Undefined,
        }
    }

    pub fn to_device_type(self) -> Result<DeviceType> {
        match self {
            Backend::CPU | Backend::SparseCPU => Ok(DeviceType::CPU),
            Backend::FPGA => Ok(DeviceType::FPGA),
            Backend::Undefined => Err(Error::UnknownBackend(
                "Undefined backend is not a valid device type".into(),
            )),
        }
    }

    /// The CPU backend with the same layout.
    pub const fn to_cpu(self) -> Backend {
        match self {
            Backend::CPU | Backend::FPGA => Backend::CPU,
            Backend::SparseCPU => Backend::SparseCPU,
            Backend::Undefined => Backend::Undefined,
        }
    }

    pub const fn is_sparse(self) -> bool {
        matches!(self, Backend::SparseCPU)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Backend::CPU => "CPU",
            Backend::SparseCPU => "SparseCPU",
            Backend::FPGA => "FPGA",
            Backend::Undefined => "UNKNOWN_BACKEND",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    Strided,
    Sparse,
}

impl Layout {
    pub const fn from_dispatch_key(key: DispatchKey) -> Layout {
        match key {
            DispatchKey::SparseCPU => Layout::Sparse,
            _ => Layout::Strided,
        }
    }

    pub const fn from_backend(backend: Backend) -> Layout {
        match backend {
            Backend::SparseCPU => Layout::Sparse,
            _ => Layout::Strided,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Strided => f.write_str("Strided"),
            Layout::Sparse => f.write_str("Sparse"),
        }
    }
}
