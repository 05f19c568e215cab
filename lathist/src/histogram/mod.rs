//! Measurement path model
//!
//! Userspace rendition of what the eBPF programs do on every start/end pair:
//! - [`clock`]: monotonic nanosecond time source (same clock as `bpf_ktime_get_ns`)
//! - [`pending`]: in-flight start timestamps keyed by execution identity
//! - [`accumulator`]: per-core histogram arena with atomic slot updates
//! - [`probe`]: glue that turns an entry/exit pair into a recorded sample
//!
//! The simulated runtime drives these directly; the kernel side shares the
//! encoder from `lathist_common` so both land samples in identical slots.

pub mod accumulator;
pub mod clock;
pub mod pending;
pub mod probe;

pub use accumulator::{HistogramSnapshot, PerCoreHistogram};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use pending::PendingStarts;
pub use probe::Probe;

// Re-export the encoder so callers need a single import path
pub use lathist_common::{
    bucket_of, encode, n_slots, slot_lower_bound, sum_contribution, sum_shift, Slot, SUM_SCALE,
};
