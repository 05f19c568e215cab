//! Nanosecond time sources

#![allow(unsafe_code)] // clock_gettime() requires unsafe

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic nanosecond clock
pub trait Clock {
    fn now(&self) -> u64;
}

/// `CLOCK_MONOTONIC`, the clock behind `bpf_ktime_get_ns()`
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[allow(clippy::cast_sign_loss)]
    fn now(&self) -> u64 {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // CLOCK_MONOTONIC cannot fail with a valid timespec pointer
        unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }
}

/// Hand-driven clock shared between clones
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    #[must_use]
    pub fn new(start_ns: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ns)))
    }

    pub fn set(&self, ns: u64) {
        self.0.store(ns, Ordering::SeqCst);
    }

    pub fn advance(&self, ns: u64) {
        self.0.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
