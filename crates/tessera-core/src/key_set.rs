//! `DispatchKeySet`: a 64-bit set of dispatch keys.
//!
//! Key with ordinal `n` lives in bit `n - 1`; `Undefined` occupies no bit, so
//! the empty mask doubles as "no capabilities". The highest set bit is the
//! highest-priority key, which is what a dispatcher extracts to pick a handler.

use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

use serde::{Deserialize, Serialize};

use crate::dispatch_key::{DispatchKey, NUM_DISPATCH_KEYS};
use crate::error::{Error, Result};

/// Bits that correspond to a key in the domain. `full()` sets bits beyond
/// this range too; key extraction ignores them.
const DOMAIN_MASK: u64 = (1u64 << (NUM_DISPATCH_KEYS - 1)) - 1;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchKeySet {
    repr: u64,
}

#[inline]
const fn key_bit(key: DispatchKey) -> u64 {
    match key {
        DispatchKey::Undefined => 0,
        k => 1u64 << (k.ordinal() - 1),
    }
}

impl DispatchKeySet {
    pub const EMPTY: DispatchKeySet = DispatchKeySet { repr: 0 };

    pub const fn empty() -> Self {
        Self::EMPTY
    }

    /// Every bit set.
    pub const fn full() -> Self {
        Self { repr: u64::MAX }
    }

    /// Every key with a strictly lower ordinal than `key`, not `key` itself.
    pub const fn full_after(key: DispatchKey) -> Self {
        match key {
            DispatchKey::Undefined => Self::EMPTY,
            k => Self {
                repr: (1u64 << (k.ordinal() - 1)) - 1,
            },
        }
    }

    /// Build a set from a raw mask. Callers must be explicit about this.
    pub const fn from_raw(repr: u64) -> Self {
        Self { repr }
    }

    /// Singleton set. `Undefined` yields the empty set.
    pub const fn from_key(key: DispatchKey) -> Self {
        Self { repr: key_bit(key) }
    }

    pub const fn raw_repr(self) -> u64 {
        self.repr
    }

    /// Membership test. Asking about `Undefined` is a caller bug.
    pub fn has(self, key: DispatchKey) -> Result<bool> {
        if key.is_undefined() {
            return Err(Error::Precondition(
                "DispatchKeySet::has called with DispatchKey::Undefined".into(),
            ));
        }
        Ok(self.repr & key_bit(key) != 0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self {
            repr: self.repr | other.repr,
        }
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self {
            repr: self.repr & other.repr,
        }
    }

    /// `self - other`.
    pub const fn difference(self, other: Self) -> Self {
        Self {
            repr: self.repr & !other.repr,
        }
    }

    /// Returns the extended set; `self` is not mutated.
    #[must_use]
    pub const fn add(self, key: DispatchKey) -> Self {
        Self {
            repr: self.repr | key_bit(key),
        }
    }

    #[must_use]
    pub const fn remove(self, key: DispatchKey) -> Self {
        Self {
            repr: self.repr & !key_bit(key),
        }
    }

    pub const fn is_empty(self) -> bool {
        self.repr == 0
    }

    /// The key of the most significant set bit, or `Undefined` for an empty set.
    pub const fn highest_priority_key(self) -> DispatchKey {
        let masked = self.repr & DOMAIN_MASK;
        let ordinal = 64 - masked.leading_zeros();
        match DispatchKey::from_ordinal(ordinal as u8) {
            Some(k) => k,
            None => DispatchKey::Undefined,
        }
    }

    /// Keys in strictly descending priority order.
    pub fn iter(self) -> Iter {
        Iter { remaining: self }
    }

    /// Number of in-domain keys present.
    pub const fn len(self) -> usize {
        (self.repr & DOMAIN_MASK).count_ones() as usize
    }
}

/// Reduce a set to a single key for code that still thinks of a tensor as
/// having exactly one key.
pub fn legacy_extract_dispatch_key(set: DispatchKeySet) -> DispatchKey {
    set.highest_priority_key()
}

impl From<DispatchKey> for DispatchKeySet {
    fn from(key: DispatchKey) -> Self {
        Self::from_key(key)
    }
}

impl FromIterator<DispatchKey> for DispatchKeySet {
    fn from_iter<I: IntoIterator<Item = DispatchKey>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::add)
    }
}

impl BitOr for DispatchKeySet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for DispatchKeySet {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl Sub for DispatchKeySet {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

/// Iterator over a key set, highest priority first.
#[derive(Debug, Clone)]
pub struct Iter {
    remaining: DispatchKeySet,
}

impl Iterator for Iter {
    type Item = DispatchKey;

    fn next(&mut self) -> Option<DispatchKey> {
        match self.remaining.highest_priority_key() {
            DispatchKey::Undefined => None,
            k => {
                self.remaining = self.remaining.remove(k);
                Some(k)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Iter {}

impl IntoIterator for DispatchKeySet {
    type Item = DispatchKey;
    type IntoIter = Iter;
    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl fmt::Display for DispatchKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DispatchKeySet(")?;
        for (i, key) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for DispatchKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self} [{:#018x}]", self.repr)
    }
}
