//! Lightweight live/peak allocation tracking.
//!
//! Keep this optional and cheap. Downstream can wire to OpenTelemetry/Prom if desired.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub const fn new() -> Self {
        Self {
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Record a new "used bytes" value; updates peak if higher.
    pub fn record_used(&self, used_bytes: usize) {
        let mut cur = self.peak_bytes.load(Ordering::Relaxed);
        while used_bytes > cur {
            match self.peak_bytes.compare_exchange(
                cur,
                used_bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(
            used_bytes,
            peak = self.peak_bytes.load(Ordering::Relaxed),
            "mem usage"
        );
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}

/// Counters an allocator updates on every allocate/release.
#[derive(Debug, Default)]
pub struct AllocationStats {
    live_bytes: AtomicUsize,
    allocations: AtomicU64,
    peak: PeakTracker,
}

impl AllocationStats {
    pub const fn new() -> Self {
        Self {
            live_bytes: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            peak: PeakTracker::new(),
        }
    }

    pub fn record_alloc(&self, bytes: usize) {
        let live = self.live_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.peak.record_used(live);
    }

    pub fn record_free(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Bytes allocated and not yet released (advisory).
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak.peak()
    }

    /// Total successful non-empty allocations.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}
