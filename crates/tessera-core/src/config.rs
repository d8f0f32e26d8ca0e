//! Memory-layer configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemConfig {
    /// Alignment (bytes) of every CPU allocation. Must be a power of two.
    pub cpu_alignment: usize,

    /// Zero-fill fresh CPU allocations.
    pub zero_fill: bool,

    /// Priority the default CPU allocator registers with. Anything registered
    /// later at an equal or higher priority replaces it.
    pub cpu_allocator_priority: u8,

    /// Optional hard cap on live CPU bytes. When set, the CPU allocator is
    /// wrapped in a capped allocator.
    pub mem_cap_bytes: Option<usize>,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            cpu_alignment: 64, // cache line / AVX-512
            zero_fill: false,
            cpu_allocator_priority: 0,
            mem_cap_bytes: None,
        }
    }
}

impl MemConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TESSERA_CPU_ALIGNMENT`: CPU allocation alignment in bytes
    /// - `TESSERA_ZERO_FILL`: `1`/`true` to zero fresh allocations
    /// - `TESSERA_CPU_PRIORITY`: registration priority of the CPU allocator
    /// - `TESSERA_MEM_CAP_BYTES`: hard cap on live CPU bytes
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TESSERA_CPU_ALIGNMENT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.cpu_alignment = v;
            }
        }

        if let Ok(s) = std::env::var("TESSERA_ZERO_FILL") {
            cfg.zero_fill = matches!(s.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Ok(s) = std::env::var("TESSERA_CPU_PRIORITY") {
            if let Ok(v) = s.parse::<u8>() {
                cfg.cpu_allocator_priority = v;
            }
        }

        if let Ok(s) = std::env::var("TESSERA_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = Some(v);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(?cfg, "loaded memory config from environment");

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cpu_alignment.is_power_of_two() {
            return Err(Error::Config(format!(
                "cpu_alignment must be a power of two, got {}",
                self.cpu_alignment
            )));
        }
        if self.mem_cap_bytes == Some(0) {
            return Err(Error::Config("mem_cap_bytes must be non-zero".into()));
        }
        Ok(())
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: MemConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}
