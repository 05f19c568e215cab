//! # Trace Lifecycle
//!
//! A trace is a histogram, its precision and two hooks, persisted together
//! under one name so it keeps measuring after the creating process exits.
//!
//! ## States
//!
//! ```text
//! Absent ──create──▶ Created ──hooks persisted──▶ Active ──remove──▶ Removed
//! ```
//!
//! `create` is all-or-nothing: a failure at any step leaves no artifacts.
//!
//! ## Collaborators
//!
//! - [`HookRegistrar`] - allocates histogram storage and attaches hooks
//! - [`Persistence`] - hierarchical, process-independent namespace
//!
//! Both are injected into [`TraceManager`]; see `backend` for the bpffs/aya
//! implementation and the simulated one used in tests.

pub mod manager;

use std::fmt;

use crate::domain::{FracBits, HookKind, TraceError, TraceName};
use crate::histogram::HistogramSnapshot;

pub use manager::{RemoveOutcome, TraceInfo, TraceManager, TraceSpec};

/// One persisted piece of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    /// Per-CPU slot array
    Slots,
    /// Precision record
    Precision,
    /// Entry hook registration
    StartHook,
    /// Exit hook registration
    EndHook,
}

impl Artifact {
    /// Every artifact, in teardown order
    pub const ALL: [Artifact; 4] =
        [Artifact::Slots, Artifact::Precision, Artifact::StartHook, Artifact::EndHook];

    /// Name of the artifact inside its trace container
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Slots => "kslots",
            Artifact::Precision => "frac_bits",
            Artifact::StartHook => "link_start",
            Artifact::EndHook => "link_end",
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Event runtime: allocates histogram storage and attaches hooks to it
///
/// An `Object` bundles the storage with every hook registered on it. Dropping
/// an object that was never handed to [`Persistence::attach`] must release
/// all of its hooks; that is how a failed `create` rolls back.
pub trait HookRegistrar {
    type Object;

    /// Allocate a zeroed histogram of `frac_bits.n_slots()` slots per core
    ///
    /// # Errors
    /// Returns an error if the storage cannot be allocated
    fn allocate(&mut self, frac_bits: FracBits) -> Result<Self::Object, TraceError>;

    /// Attach the start (`Entry`) or end (`Exit`) handler of `object` to `symbol`
    ///
    /// # Errors
    /// Returns an error if `symbol` cannot be resolved or attached
    fn register(
        &mut self,
        object: &mut Self::Object,
        symbol: &str,
        kind: HookKind,
    ) -> Result<(), TraceError>;
}

/// Durable namespace of traces
pub trait Persistence {
    /// What [`HookRegistrar::allocate`] produces
    type Object;
    /// Lazy, single-pass sequence of trace names
    type Names: Iterator<Item = Result<TraceName, TraceError>>;

    /// # Errors
    /// Returns an error if the namespace cannot be queried
    fn exists(&self, name: &TraceName) -> Result<bool, TraceError>;

    /// Create the container for `name`; exclusive
    ///
    /// # Errors
    /// Returns [`TraceError::DuplicateTrace`] if it already exists
    fn create_container(&mut self, name: &TraceName) -> Result<(), TraceError>;

    /// Persist every artifact of `object` under `name`
    ///
    /// # Errors
    /// Returns an error if any artifact cannot be persisted; artifacts
    /// persisted before the failure are left for the caller to detach
    fn attach(&mut self, name: &TraceName, object: Self::Object) -> Result<(), TraceError>;

    /// Release one artifact
    ///
    /// # Errors
    /// Returns an error if the artifact exists but cannot be released
    fn detach(&mut self, name: &TraceName, artifact: Artifact) -> Result<(), TraceError>;

    /// Remove the (empty) container for `name`
    ///
    /// # Errors
    /// Returns [`TraceError::TeardownFailed`] if the container cannot be removed
    fn remove_container(&mut self, name: &TraceName) -> Result<(), TraceError>;

    /// Scan the namespace
    ///
    /// # Errors
    /// Returns an error if the namespace root cannot be opened
    fn list_container(&self) -> Result<Self::Names, TraceError>;

    /// # Errors
    /// Returns [`TraceError::NotFound`] if `name` has no precision record
    fn load_precision(&self, name: &TraceName) -> Result<FracBits, TraceError>;

    /// # Errors
    /// Returns [`TraceError::NotFound`] if `name` has no histogram
    fn load_histogram(
        &self,
        name: &TraceName,
        frac_bits: FracBits,
    ) -> Result<HistogramSnapshot, TraceError>;
}
