//! # Reader / Aggregator
//!
//! Turns a persisted per-CPU histogram back into rows a human can read.
//!
//! For every slot with at least one sample:
//! - one row per CPU that saw samples: `avg = (sum / samples) << sum_shift`
//! - one merged row: total samples, and the mean of the per-CPU averages
//!
//! The merged average is deliberately **not** weighted by each CPU's sample
//! count. With uneven counts it is biased toward quiet CPUs; existing output
//! has always been computed this way, so it stays.

use std::fmt;

use lathist_common::{slot_lower_bound, sum_shift};
use serde::Serialize;

use crate::domain::{FracBits, TraceError, TraceName};
use crate::histogram::HistogramSnapshot;
use crate::lifecycle::Persistence;

/// Aggregated view of one trace
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub name: TraceName,
    pub frac_bits: FracBits,
    pub rows: Vec<BucketRow>,
}

/// One non-empty slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketRow {
    pub slot: u32,
    /// Smallest duration that lands in this slot
    pub lower_bound_ns: u64,
    pub cpus: Vec<CpuRow>,
    /// Samples over all CPUs
    pub samples: u64,
    /// Unweighted mean of the per-CPU averages
    pub avg_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuRow {
    pub cpu: u32,
    pub samples: u64,
    pub avg_ns: u64,
}

impl Report {
    /// Merged samples over every slot
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.rows.iter().map(|r| r.samples).sum()
    }

    #[must_use]
    pub fn row(&self, slot: u32) -> Option<&BucketRow> {
        self.rows.iter().find(|r| r.slot == slot)
    }
}

/// Aggregate a snapshot
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn aggregate(name: TraceName, snapshot: &HistogramSnapshot) -> Report {
    let frac_bits = snapshot.frac_bits;
    let mut rows = Vec::new();

    for (index, per_cpu) in snapshot.slots.iter().enumerate() {
        let slot = index as u32;
        let shift = sum_shift(slot, frac_bits.get());

        let mut cpus = Vec::new();
        let mut total_samples = 0u64;
        let mut avg_total = 0u64;

        for (cpu, cell) in per_cpu.iter().enumerate() {
            if cell.samples == 0 {
                continue;
            }
            let avg = cell.sum / cell.samples;
            total_samples = total_samples.wrapping_add(cell.samples);
            avg_total = avg_total.wrapping_add(avg);
            cpus.push(CpuRow { cpu: cpu as u32, samples: cell.samples, avg_ns: avg << shift });
        }

        if cpus.is_empty() {
            continue;
        }

        rows.push(BucketRow {
            slot,
            lower_bound_ns: slot_lower_bound(slot, frac_bits.get()),
            samples: total_samples,
            avg_ns: (avg_total / cpus.len() as u64) << shift,
            cpus,
        });
    }

    Report { name, frac_bits, rows }
}

/// Load `name` from `store` and aggregate it
///
/// # Errors
/// Returns [`TraceError::NotFound`] if `name` has no precision record, or the
/// store's error if the histogram cannot be read
pub fn read_trace<P: Persistence>(store: &P, name: &TraceName) -> Result<Report, TraceError> {
    let frac_bits = store.load_precision(name)?;
    let snapshot = store.load_histogram(name, frac_bits)?;
    Ok(aggregate(name.clone(), &snapshot))
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frac_bits: {}", self.frac_bits)?;
        for row in &self.rows {
            for cpu in &row.cpus {
                writeln!(
                    f,
                    "CPU {:3} slot {:3} samples {:8} avg {:9}",
                    cpu.cpu, row.slot, cpu.samples, cpu.avg_ns
                )?;
            }
            writeln!(f, "CPUS    slot {:3} samples {:8} avg {:9}", row.slot, row.samples, row.avg_ns)?;
        }
        Ok(())
    }
}
