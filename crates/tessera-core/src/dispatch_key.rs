//! Dispatch keys: the ordered domain of capability tags.
//!
//! A dispatch key identifies a "level" of dispatch for which a handler may be
//! registered. Backends (CPU, SparseCPU, ...) get keys, and so do wrapping
//! layers such as Autograd. Each key owns exactly one bit of a
//! [`DispatchKeySet`](crate::key_set::DispatchKeySet); higher ordinals are
//! dispatched first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DispatchKey {
    /// Not a real key. Returned when a key set has no elements, so a
    /// `DispatchKey` can play the role of `Option<RealKey>` in a single byte.
    #[default]
    Undefined = 0,

    // ----- backends -----
    // Order only matters for backends that take part in multiple dispatch
    // with each other (SparseCPU must outrank CPU).
    CPU,
    SparseCPU,
    FPGA,
    /// Computes output metadata (shape, dtype) without touching data.
    Meta,
    /// Picks a backend for operators that take no tensor arguments.
    BackendSelect,
    Named,

    // ----- autograd -----
    Autograd,
    Profiler,
    Tracer,
    /// Precedes autograd so casts are recorded in the post-cast type.
    Autocast,

    // ----- wrappers -----
    /// Batching rules for vmap.
    Batched,
    TestingOnlyGenericWrapper,
    TestingOnlyGenericMode,
}

/// Number of keys in the domain, including `Undefined`.
pub const NUM_DISPATCH_KEYS: usize = DispatchKey::ALL.len();

// Every key other than Undefined is projected onto one bit of a u64.
const _: () = assert!(
    NUM_DISPATCH_KEYS <= 64,
    "DispatchKey is used as an index into a 64-bit mask; keep fewer than 64 real keys"
);
const _: () = assert!(DispatchKey::TestingOnlyGenericMode as usize + 1 == NUM_DISPATCH_KEYS);

impl DispatchKey {
    /// Alias kept for handlers registered for "any key".
    pub const CATCH_ALL: DispatchKey = DispatchKey::Undefined;

    /// Ordinal table. Position `i` holds the key whose ordinal is `i`.
    pub const ALL: [DispatchKey; 14] = [
        DispatchKey::Undefined,
        DispatchKey::CPU,
        DispatchKey::SparseCPU,
        DispatchKey::FPGA,
        DispatchKey::Meta,
        DispatchKey::BackendSelect,
        DispatchKey::Named,
        DispatchKey::Autograd,
        DispatchKey::Profiler,
        DispatchKey::Tracer,
        DispatchKey::Autocast,
        DispatchKey::Batched,
        DispatchKey::TestingOnlyGenericWrapper,
        DispatchKey::TestingOnlyGenericMode,
    ];

    #[inline]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Look a key up by ordinal. `None` for ordinals outside the domain.
    #[inline]
    pub const fn from_ordinal(ordinal: u8) -> Option<DispatchKey> {
        if (ordinal as usize) < NUM_DISPATCH_KEYS {
            Some(Self::ALL[ordinal as usize])
        } else {
            None
        }
    }

    pub const fn is_undefined(self) -> bool {
        matches!(self, DispatchKey::Undefined)
    }

    pub const fn name(self) -> &'static str {
        match self {
            DispatchKey::Undefined => "Undefined",
            DispatchKey::CPU => "CPU",
            DispatchKey::SparseCPU => "SparseCPU",
            DispatchKey::FPGA => "FPGA",
            DispatchKey::Meta => "Meta",
            DispatchKey::BackendSelect => "BackendSelect",
            DispatchKey::Named => "Named",
            DispatchKey::Autograd => "Autograd",
            DispatchKey::Profiler => "Profiler",
            DispatchKey::Tracer => "Tracer",
            DispatchKey::Autocast => "Autocast",
            DispatchKey::Batched => "Batched",
            DispatchKey::TestingOnlyGenericWrapper => "TESTING_ONLY_GenericWrapper",
            DispatchKey::TestingOnlyGenericMode => "TESTING_ONLY_GenericMode",
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DispatchKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DispatchKey::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| Error::UnknownDispatchKey(s.to_string()))
    }
}
