//! Per-core histogram arena
//!
//! One fixed-length slot array per core, allocated once. The writer never
//! reads; the reader takes a [`HistogramSnapshot`] laid out `[slot][cpu]`,
//! the same shape a per-CPU BPF array lookup returns.

use std::sync::atomic::{AtomicU64, Ordering};

use lathist_common::Slot;

use crate::domain::{CpuId, FracBits};

/// One slot whose fields can be bumped from interrupting contexts
#[derive(Debug, Default)]
struct AtomicSlot {
    samples: AtomicU64,
    sum: AtomicU64,
}

impl AtomicSlot {
    fn load(&self) -> Slot {
        Slot { samples: self.samples.load(Ordering::Relaxed), sum: self.sum.load(Ordering::Relaxed) }
    }
}

/// Histogram replicated per core
#[derive(Debug)]
pub struct PerCoreHistogram {
    frac_bits: FracBits,
    cores: Box<[Box<[AtomicSlot]>]>,
}

impl PerCoreHistogram {
    /// Zeroed histogram with `frac_bits.n_slots()` slots on each of `n_cores`
    #[must_use]
    pub fn new(frac_bits: FracBits, n_cores: usize) -> Self {
        let n_slots = frac_bits.n_slots() as usize;
        let cores = (0..n_cores)
            .map(|_| (0..n_slots).map(|_| AtomicSlot::default()).collect())
            .collect();
        Self { frac_bits, cores }
    }

    #[must_use]
    pub fn frac_bits(&self) -> FracBits {
        self.frac_bits
    }

    #[must_use]
    pub fn n_cores(&self) -> usize {
        self.cores.len()
    }

    /// Add one sample with compressed `contribution` to `core`'s `slot`
    ///
    /// Wraps on overflow. Out-of-range cores or slots are ignored, the same
    /// way a failed per-CPU map lookup ends the eBPF handler early.
    pub fn record(&self, core: CpuId, slot: u32, contribution: u64) {
        let Some(cell) = self.cores.get(core.0 as usize).and_then(|c| c.get(slot as usize)) else {
            return;
        };
        cell.samples.fetch_add(1, Ordering::Relaxed);
        cell.sum.fetch_add(contribution, Ordering::Relaxed);
    }

    /// Copy out the current contents
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let n_slots = self.frac_bits.n_slots() as usize;
        let slots = (0..n_slots)
            .map(|slot| self.cores.iter().map(|core| core[slot].load()).collect())
            .collect();
        HistogramSnapshot { frac_bits: self.frac_bits, slots }
    }
}

/// Point-in-time copy of a trace's histogram
///
/// `slots[i][cpu]`; every inner vector has one entry per possible CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub frac_bits: FracBits,
    pub slots: Vec<Vec<Slot>>,
}

impl HistogramSnapshot {
    /// All-zero snapshot
    #[must_use]
    pub fn empty(frac_bits: FracBits, n_cores: usize) -> Self {
        let slots = vec![vec![Slot::default(); n_cores]; frac_bits.n_slots() as usize];
        Self { frac_bits, slots }
    }

    /// Total samples across every slot and core
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.slots.iter().flatten().fold(0u64, |acc, s| acc.wrapping_add(s.samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bits(n: u32) -> FracBits {
        FracBits::new(n).unwrap()
    }

    #[test]
    fn test_new_is_zeroed_and_sized() {
        let hist = PerCoreHistogram::new(bits(2), 4);
        let snap = hist.snapshot();
        assert_eq!(snap.slots.len(), 253);
        assert!(snap.slots.iter().all(|per_cpu| per_cpu.len() == 4));
        assert_eq!(snap, HistogramSnapshot::empty(bits(2), 4));
    }

    #[test]
    fn test_record_k_times() {
        let hist = PerCoreHistogram::new(bits(0), 2);
        for _ in 0..7 {
            hist.record(CpuId(1), 20, 1_000_000);
        }
        let snap = hist.snapshot();
        assert_eq!(snap.slots[20][1], Slot { samples: 7, sum: 7_000_000 });
        assert_eq!(snap.slots[20][0], Slot::default());
        assert_eq!(snap.total_samples(), 7);
    }

    #[test]
    fn test_sum_wraps() {
        let hist = PerCoreHistogram::new(bits(0), 1);
        hist.record(CpuId(0), 3, u64::MAX);
        hist.record(CpuId(0), 3, 2);
        assert_eq!(hist.snapshot().slots[3][0], Slot { samples: 2, sum: 1 });
    }

    #[test]
    fn test_out_of_range_ignored() {
        let hist = PerCoreHistogram::new(bits(0), 1);
        hist.record(CpuId(5), 0, 1);
        hist.record(CpuId(0), 66, 1);
        assert_eq!(hist.snapshot().total_samples(), 0);
    }

    #[test]
    fn test_concurrent_same_core_no_lost_updates() {
        let hist = Arc::new(PerCoreHistogram::new(bits(1), 2));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let hist = Arc::clone(&hist);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        hist.record(CpuId(0), 42, 3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snap = hist.snapshot();
        assert_eq!(snap.slots[42][0], Slot { samples: 80_000, sum: 240_000 });
    }
}
