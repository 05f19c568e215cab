//! # Simulated Event Runtime
//!
//! In-process stand-ins for the kernel and bpffs, so the lifecycle and the
//! measurement path can be exercised without root:
//!
//! - [`SimKernel`] - a set of hookable symbols, a manual clock and a fixed
//!   number of cores. Calling [`SimKernel::enter`] / [`SimKernel::exit`] on a
//!   symbol fires every hook registered on it.
//! - [`SimStore`] - an in-memory namespace with fault injection for each
//!   persistence step.
//!
//! Hooks are owned handles: dropping a [`SimHook`] unregisters it, which is
//! what closing the last fd of a BPF link does.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lathist_common::PENDING_CAPACITY;
use log::debug;

use crate::domain::{CpuId, FracBits, HookKind, Identity, TraceError, TraceName};
use crate::histogram::{HistogramSnapshot, ManualClock, PendingStarts, PerCoreHistogram, Probe};
use crate::lifecycle::{Artifact, HookRegistrar, Persistence};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Kernel
// ============================================================================

#[derive(Debug)]
struct HookEntry {
    id: u64,
    symbol: String,
    kind: HookKind,
    probe: Arc<Probe<ManualClock>>,
}

#[derive(Debug)]
struct KernelInner {
    clock: ManualClock,
    n_cores: usize,
    symbols: Mutex<BTreeSet<String>>,
    hooks: Mutex<Vec<HookEntry>>,
    next_id: AtomicU64,
}

/// Simulated kernel; cheap to clone, clones share state
#[derive(Debug, Clone)]
pub struct SimKernel {
    inner: Arc<KernelInner>,
}

impl SimKernel {
    pub fn new<I, S>(n_cores: usize, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(KernelInner {
                clock: ManualClock::new(0),
                n_cores,
                symbols: Mutex::new(symbols.into_iter().map(Into::into).collect()),
                hooks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.inner.clock
    }

    #[must_use]
    pub fn n_cores(&self) -> usize {
        self.inner.n_cores
    }

    pub fn add_symbol(&self, symbol: impl Into<String>) {
        lock(&self.inner.symbols).insert(symbol.into());
    }

    /// Number of hooks currently registered, on any symbol
    #[must_use]
    pub fn hook_count(&self) -> usize {
        lock(&self.inner.hooks).len()
    }

    fn probes(&self, symbol: &str, kind: HookKind) -> Vec<Arc<Probe<ManualClock>>> {
        lock(&self.inner.hooks)
            .iter()
            .filter(|h| h.kind == kind && h.symbol == symbol)
            .map(|h| Arc::clone(&h.probe))
            .collect()
    }

    /// `id` enters `symbol`
    pub fn enter(&self, symbol: &str, id: Identity) {
        for probe in self.probes(symbol, HookKind::Entry) {
            probe.on_entry(id);
        }
    }

    /// `id` returns from `symbol` on `core`
    pub fn exit(&self, symbol: &str, id: Identity, core: CpuId) {
        for probe in self.probes(symbol, HookKind::Exit) {
            probe.on_exit(id, core);
        }
    }

    /// One call of `symbol` by `id` on `core` taking `duration_ns`
    pub fn call(&self, symbol: &str, id: Identity, core: CpuId, duration_ns: u64) {
        self.enter(symbol, id);
        self.inner.clock.advance(duration_ns);
        self.exit(symbol, id, core);
    }
}

/// Registration handle; unregisters on drop
#[derive(Debug)]
pub struct SimHook {
    id: u64,
    kernel: Weak<KernelInner>,
}

impl Drop for SimHook {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel.upgrade() {
            lock(&kernel.hooks).retain(|h| h.id != self.id);
            debug!("Released simulated hook {}", self.id);
        }
    }
}

/// What [`SimKernel::allocate`] hands out
#[derive(Debug)]
pub struct SimTrace {
    probe: Arc<Probe<ManualClock>>,
    start: Option<SimHook>,
    end: Option<SimHook>,
}

impl SimTrace {
    #[must_use]
    pub fn histogram(&self) -> &Arc<PerCoreHistogram> {
        self.probe.histogram()
    }
}

impl HookRegistrar for SimKernel {
    type Object = SimTrace;

    fn allocate(&mut self, frac_bits: FracBits) -> Result<SimTrace, TraceError> {
        let histogram = Arc::new(PerCoreHistogram::new(frac_bits, self.inner.n_cores));
        let pending = PendingStarts::new(self.inner.clock.clone(), PENDING_CAPACITY as usize);
        Ok(SimTrace { probe: Arc::new(Probe::new(pending, histogram)), start: None, end: None })
    }

    fn register(
        &mut self,
        object: &mut SimTrace,
        symbol: &str,
        kind: HookKind,
    ) -> Result<(), TraceError> {
        if !lock(&self.inner.symbols).contains(symbol) {
            return Err(TraceError::HookAttachFailed {
                symbol: symbol.to_string(),
                kind,
                reason: "no such symbol".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.hooks).push(HookEntry {
            id,
            symbol: symbol.to_string(),
            kind,
            probe: Arc::clone(&object.probe),
        });
        let hook = SimHook { id, kernel: Arc::downgrade(&self.inner) };

        match kind {
            HookKind::Entry => object.start = Some(hook),
            HookKind::Exit => object.end = Some(hook),
        }
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
struct Container {
    histogram: Option<Arc<PerCoreHistogram>>,
    precision: Option<FracBits>,
    start: Option<SimHook>,
    end: Option<SimHook>,
}

impl Container {
    fn holds(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::Slots => self.histogram.is_some(),
            Artifact::Precision => self.precision.is_some(),
            Artifact::StartHook => self.start.is_some(),
            Artifact::EndHook => self.end.is_some(),
        }
    }

    fn release(&mut self, artifact: Artifact) {
        match artifact {
            Artifact::Slots => self.histogram = None,
            Artifact::Precision => self.precision = None,
            Artifact::StartHook => self.start = None,
            Artifact::EndHook => self.end = None,
        }
    }
}

/// In-memory namespace
#[derive(Debug, Default)]
pub struct SimStore {
    containers: BTreeMap<TraceName, Container>,
    fail_attach: Option<Artifact>,
    fail_detach: BTreeSet<Artifact>,
    fail_remove_container: bool,
}

impl SimStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `attach` fail when it reaches `artifact`; earlier artifacts stay persisted
    pub fn fail_attach(&mut self, artifact: Option<Artifact>) {
        self.fail_attach = artifact;
    }

    /// Make `detach` of `artifact` fail
    pub fn fail_detach(&mut self, artifact: Artifact) {
        self.fail_detach.insert(artifact);
    }

    pub fn fail_remove_container(&mut self, fail: bool) {
        self.fail_remove_container = fail;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Artifacts currently persisted under `name`
    #[must_use]
    pub fn artifacts(&self, name: &str) -> Vec<Artifact> {
        let Ok(name) = TraceName::new(name) else {
            return Vec::new();
        };
        self.containers.get(&name).map_or_else(Vec::new, |c| {
            Artifact::ALL.into_iter().filter(|a| c.holds(*a)).collect()
        })
    }

    fn container(&self, name: &TraceName) -> Result<&Container, TraceError> {
        self.containers.get(name).ok_or_else(|| TraceError::NotFound(name.clone()))
    }
}

impl Persistence for SimStore {
    type Object = SimTrace;
    type Names = std::vec::IntoIter<Result<TraceName, TraceError>>;

    fn exists(&self, name: &TraceName) -> Result<bool, TraceError> {
        Ok(self.containers.contains_key(name))
    }

    fn create_container(&mut self, name: &TraceName) -> Result<(), TraceError> {
        if self.containers.contains_key(name) {
            return Err(TraceError::DuplicateTrace(name.clone()));
        }
        self.containers.insert(name.clone(), Container::default());
        Ok(())
    }

    fn attach(&mut self, name: &TraceName, mut object: SimTrace) -> Result<(), TraceError> {
        let fail_at = self.fail_attach;
        let container = self
            .containers
            .get_mut(name)
            .ok_or_else(|| TraceError::NotFound(name.clone()))?;

        for artifact in Artifact::ALL {
            if fail_at == Some(artifact) {
                return Err(TraceError::Persist {
                    name: name.clone(),
                    artifact,
                    reason: "injected failure".to_string(),
                });
            }
            match artifact {
                Artifact::Slots => {
                    container.histogram = Some(Arc::clone(object.probe.histogram()));
                }
                Artifact::Precision => {
                    container.precision = Some(object.probe.histogram().frac_bits());
                }
                Artifact::StartHook => container.start = object.start.take(),
                Artifact::EndHook => container.end = object.end.take(),
            }
        }
        Ok(())
    }

    fn detach(&mut self, name: &TraceName, artifact: Artifact) -> Result<(), TraceError> {
        if self.fail_detach.contains(&artifact) {
            return Err(io::Error::other(format!("injected failure releasing {artifact}")).into());
        }
        if let Some(container) = self.containers.get_mut(name) {
            container.release(artifact);
        }
        Ok(())
    }

    fn remove_container(&mut self, name: &TraceName) -> Result<(), TraceError> {
        let teardown = |source: io::Error| TraceError::TeardownFailed { name: name.clone(), source };

        if self.fail_remove_container {
            return Err(teardown(io::Error::other("injected failure")));
        }
        let container = self
            .containers
            .get(name)
            .ok_or_else(|| teardown(io::ErrorKind::NotFound.into()))?;
        if Artifact::ALL.into_iter().any(|a| container.holds(a)) {
            return Err(teardown(io::Error::other("container not empty")));
        }
        self.containers.remove(name);
        Ok(())
    }

    fn list_container(&self) -> Result<Self::Names, TraceError> {
        let names: Vec<_> = self.containers.keys().cloned().map(Ok).collect();
        Ok(names.into_iter())
    }

    fn load_precision(&self, name: &TraceName) -> Result<FracBits, TraceError> {
        self.container(name)?.precision.ok_or_else(|| TraceError::NotFound(name.clone()))
    }

    fn load_histogram(
        &self,
        name: &TraceName,
        frac_bits: FracBits,
    ) -> Result<HistogramSnapshot, TraceError> {
        let histogram = self
            .container(name)?
            .histogram
            .as_ref()
            .ok_or_else(|| TraceError::NotFound(name.clone()))?;
        let mut snapshot = histogram.snapshot();
        snapshot.frac_bits = frac_bits;
        Ok(snapshot)
    }
}
