//! Entry/exit handler pair
//!
//! Same steps as `lat_start`/`lat_end` in the eBPF object, against the
//! userspace pending table and accumulator.

use std::sync::Arc;

use lathist_common::{bucket_of, encode, sum_contribution};

use super::accumulator::PerCoreHistogram;
use super::clock::Clock;
use super::pending::PendingStarts;
use crate::domain::{CpuId, Identity};

#[derive(Debug)]
pub struct Probe<C> {
    pending: PendingStarts<C>,
    histogram: Arc<PerCoreHistogram>,
}

impl<C: Clock> Probe<C> {
    pub fn new(pending: PendingStarts<C>, histogram: Arc<PerCoreHistogram>) -> Self {
        Self { pending, histogram }
    }

    #[must_use]
    pub fn histogram(&self) -> &Arc<PerCoreHistogram> {
        &self.histogram
    }

    /// Start handler
    pub fn on_entry(&self, id: Identity) {
        self.pending.begin(id);
    }

    /// End handler; returns the slot the sample landed in
    ///
    /// `None` when there was no matching start. That is a normal outcome, not
    /// an error: a child forked between start and end has no pending entry.
    pub fn on_exit(&self, id: Identity, core: CpuId) -> Option<u32> {
        let elapsed = self.pending.end(id)?;
        let frac_bits = self.histogram.frac_bits().get();
        let slot = encode(elapsed, frac_bits);
        let contribution = sum_contribution(elapsed, bucket_of(elapsed, frac_bits));
        self.histogram.record(core, slot, contribution);
        Some(slot)
    }
}
