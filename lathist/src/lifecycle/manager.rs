//! Create, remove, enumerate and read named traces

use log::{debug, info, warn};
use serde::Serialize;

use super::{Artifact, HookRegistrar, Persistence};
use crate::domain::{FracBits, HookFailures, HookKind, TraceError, TraceName, TraceState};
use crate::report::{read_trace, Report};

/// What to create: raw user input, validated by [`TraceManager::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSpec {
    pub name: String,
    pub bits: u32,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TraceSpec {
    /// Trace `name` with precision 0, timing entry to exit of `name` itself
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), bits: 0, start: None, end: None }
    }

    #[must_use]
    pub fn bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    #[must_use]
    pub fn start(mut self, symbol: impl Into<String>) -> Self {
        self.start = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn end(mut self, symbol: impl Into<String>) -> Self {
        self.end = Some(symbol.into());
        self
    }

    /// Start target, defaulting to the trace name
    #[must_use]
    pub fn start_symbol(&self) -> &str {
        self.start.as_deref().unwrap_or(&self.name)
    }

    /// End target, defaulting to the start target
    #[must_use]
    pub fn end_symbol(&self) -> &str {
        self.end.as_deref().unwrap_or_else(|| self.start_symbol())
    }
}

/// A trace that was just created
#[derive(Debug, Clone, Serialize)]
pub struct TraceInfo {
    pub name: TraceName,
    pub frac_bits: FracBits,
    pub n_slots: u32,
    pub start: String,
    pub end: String,
    pub state: TraceState,
}

/// Result of a teardown that got as far as removing the container
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    pub name: TraceName,
    /// Artifacts that could not be released individually
    pub failed: Vec<Artifact>,
}

impl RemoveOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the registrar and the namespace; the only writer of persisted traces
pub struct TraceManager<R, P> {
    registrar: R,
    store: P,
}

impl<R, P> TraceManager<R, P>
where
    R: HookRegistrar,
    P: Persistence<Object = R::Object>,
{
    pub fn new(registrar: R, store: P) -> Self {
        Self { registrar, store }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    /// Allocate, hook up and persist a new trace
    ///
    /// Input is validated before the namespace or the event runtime is
    /// touched. Both hooks are attempted even if the first fails. Nothing is
    /// left behind on failure.
    ///
    /// # Errors
    /// - [`TraceError::InvalidPrecision`] / [`TraceError::InvalidName`] for bad input
    /// - [`TraceError::DuplicateTrace`] if `name` is already live
    /// - [`TraceError::HookRegistration`] if either target cannot be hooked
    /// - allocation or persistence errors from the collaborators
    pub fn create(&mut self, spec: &TraceSpec) -> Result<TraceInfo, TraceError> {
        let frac_bits = FracBits::new(spec.bits)?;
        let name = TraceName::new(spec.name.clone())?;
        let start = spec.start_symbol().to_string();
        let end = spec.end_symbol().to_string();

        if self.store.exists(&name)? {
            return Err(TraceError::DuplicateTrace(name));
        }

        let mut object = self.registrar.allocate(frac_bits)?;
        debug!("{name}: {} -> {}", TraceState::Absent, TraceState::Created);

        let mut failures = HookFailures::default();
        if let Err(e) = self.registrar.register(&mut object, &start, HookKind::Entry) {
            failures.start = Some(e.to_string());
        }
        if let Err(e) = self.registrar.register(&mut object, &end, HookKind::Exit) {
            failures.end = Some(e.to_string());
        }
        if !failures.is_empty() {
            // Dropping the object releases whichever hook did attach
            drop(object);
            return Err(TraceError::HookRegistration(failures));
        }

        // Exclusive: a concurrent creator that passed the existence test
        // loses here, before anything of its own is persisted
        self.store.create_container(&name)?;

        if let Err(e) = self.store.attach(&name, object) {
            self.rollback(&name);
            return Err(e);
        }
        debug!("{name}: {} -> {}", TraceState::Created, TraceState::Active);
        info!("✓ Trace {name} active ({start} -> {end}, frac_bits {frac_bits})");

        Ok(TraceInfo {
            n_slots: frac_bits.n_slots(),
            name,
            frac_bits,
            start,
            end,
            state: TraceState::Active,
        })
    }

    fn rollback(&mut self, name: &TraceName) {
        for artifact in Artifact::ALL {
            // Most of these were never persisted; failures are expected
            let _ = self.store.detach(name, artifact);
        }
        if let Err(e) = self.store.remove_container(name) {
            warn!("Failed to roll back partially created trace {name}: {e}");
        }
    }

    /// Release every artifact of `name`, then its container
    ///
    /// Each artifact is released independently; failures are logged and
    /// listed in the outcome.
    ///
    /// # Errors
    /// - [`TraceError::NotFound`] if `name` does not exist
    /// - [`TraceError::TeardownFailed`] if the container cannot be removed
    pub fn remove(&mut self, name: &str) -> Result<RemoveOutcome, TraceError> {
        let name = TraceName::new(name)?;
        if !self.store.exists(&name)? {
            return Err(TraceError::NotFound(name));
        }

        let mut failed = Vec::new();
        for artifact in Artifact::ALL {
            if let Err(e) = self.store.detach(&name, artifact) {
                warn!("Failed to release {artifact} of trace {name}: {e}");
                failed.push(artifact);
            }
        }

        self.store.remove_container(&name)?;
        debug!("{name}: {} -> {}", TraceState::Active, TraceState::Removed);

        Ok(RemoveOutcome { name, failed })
    }

    /// Names of all persisted traces
    ///
    /// # Errors
    /// Returns an error if the namespace cannot be scanned
    pub fn list(&self) -> Result<P::Names, TraceError> {
        self.store.list_container()
    }

    /// `Active` if `name` is persisted, `Absent` otherwise
    ///
    /// # Errors
    /// Returns an error for an invalid name or an unreadable namespace
    pub fn state(&self, name: &str) -> Result<TraceState, TraceError> {
        let name = TraceName::new(name)?;
        Ok(if self.store.exists(&name)? { TraceState::Active } else { TraceState::Absent })
    }

    /// Load and aggregate the histogram of `name`
    ///
    /// # Errors
    /// Returns [`TraceError::NotFound`] if `name` does not exist
    pub fn read(&self, name: &str) -> Result<Report, TraceError> {
        read_trace(&self.store, &TraceName::new(name)?)
    }
}
