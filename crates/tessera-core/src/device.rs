//! Device identity: a device type ordinal plus an optional index.
//!
//! The allocator registry uses the ordinal as an array index, so the domain is
//! kept small and fixed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum DeviceType {
    #[default]
    CPU = 0,
    FPGA = 1,
}

/// Number of device types; sizes per-device tables such as the allocator registry.
pub const COMPILE_TIME_MAX_DEVICE_TYPES: usize = DeviceType::ALL.len();

// Per-device tables live on the stack; adding a 17th device type should be a
// deliberate decision.
const _: () = assert!(COMPILE_TIME_MAX_DEVICE_TYPES <= 16);

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::CPU, DeviceType::FPGA];

    #[inline]
    pub const fn ordinal(self) -> usize {
        self as i16 as usize
    }

    pub const fn name(self, lower_case: bool) -> &'static str {
        match (self, lower_case) {
            (DeviceType::CPU, false) => "CPU",
            (DeviceType::CPU, true) => "cpu",
            (DeviceType::FPGA, false) => "FPGA",
            (DeviceType::FPGA, true) => "fpga",
        }
    }

    /// Whether a raw ordinal names a known device type.
    pub fn is_valid(raw: i16) -> bool {
        DeviceType::try_from(raw).is_ok()
    }
}

impl TryFrom<i16> for DeviceType {
    type Error = Error;

    fn try_from(raw: i16) -> Result<Self> {
        match raw {
            0 => Ok(DeviceType::CPU),
            1 => Ok(DeviceType::FPGA),
            other => Err(Error::UnknownDeviceType(other)),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name(true))
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|d| d.name(true) == s || d.name(false) == s)
            .ok_or_else(|| Error::InvalidDevice(s.to_string()))
    }
}

/// Index of a device within its type (e.g. the second FPGA card).
pub type DeviceIndex = i16;

/// A concrete device: type plus optional index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    device_type: DeviceType,
    index: Option<DeviceIndex>,
}

impl Device {
    pub fn new(device_type: DeviceType, index: Option<DeviceIndex>) -> Result<Self> {
        if let Some(i) = index {
            if i < 0 {
                return Err(Error::InvalidDevice(format!(
                    "{device_type}:{i} (device index must be non-negative)"
                )));
            }
        }
        Ok(Self { device_type, index })
    }

    pub const fn cpu() -> Self {
        Self {
            device_type: DeviceType::CPU,
            index: None,
        }
    }

    pub const fn of_type(device_type: DeviceType) -> Self {
        Self {
            device_type,
            index: None,
        }
    }

    pub const fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub const fn index(&self) -> Option<DeviceIndex> {
        self.index
    }

    pub const fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub const fn is_cpu(&self) -> bool {
        matches!(self.device_type, DeviceType::CPU)
    }
}

impl From<DeviceType> for Device {
    fn from(device_type: DeviceType) -> Self {
        Device::of_type(device_type)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{i}", self.device_type),
            None => write!(f, "{}", self.device_type),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    /// Parses `"cpu"`, `"fpga"` or `"<type>:<index>"`.
    fn from_str(s: &str) -> Result<Self> {
        let (ty, index) = match s.split_once(':') {
            Some((ty, idx)) => {
                let idx = idx
                    .parse::<DeviceIndex>()
                    .map_err(|_| Error::InvalidDevice(s.to_string()))?;
                (ty, Some(idx))
            }
            None => (s, None),
        };
        let device_type = ty
            .parse::<DeviceType>()
            .map_err(|_| Error::InvalidDevice(s.to_string()))?;
        Device::new(device_type, index)
    }
}
