//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep a raw `u32` precision or a raw path string from
//! reaching code that assumes it was already validated.

use std::fmt;

use lathist_common::{frac_mask, n_slots, MAX_FRAC_BITS};
use serde::Serialize;

use super::errors::TraceError;

/// Histogram precision (extra mantissa bits per power of two), `0..=3`
///
/// Fixed when a trace is created. Governs both the number of slots and the
/// resolution inside each power-of-two bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FracBits(u32);

impl FracBits {
    /// Validate a precision
    ///
    /// # Errors
    /// Returns [`TraceError::InvalidPrecision`] if `bits > 3`
    pub fn new(bits: u32) -> Result<Self, TraceError> {
        if bits > MAX_FRAC_BITS {
            return Err(TraceError::InvalidPrecision(bits));
        }
        Ok(Self(bits))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Histogram length for this precision
    #[must_use]
    pub fn n_slots(self) -> u32 {
        n_slots(self.0)
    }

    #[must_use]
    pub fn mask(self) -> u32 {
        frac_mask(self.0)
    }
}

impl Default for FracBits {
    fn default() -> Self {
        Self(0)
    }
}

impl fmt::Display for FracBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trace name (validated)
///
/// The name doubles as a directory under the pin root, so it must be a single
/// non-empty path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TraceName(String);

impl TraceName {
    /// Validate a trace name
    ///
    /// # Errors
    /// Returns [`TraceError::InvalidName`] for empty names, `.`/`..`, or names
    /// containing `/` or NUL
    pub fn new(name: impl Into<String>) -> Result<Self, TraceError> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(TraceError::InvalidName(name));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TraceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

/// Execution identity: process ID in the high half, thread ID in the low half
///
/// Same packing as `bpf_get_current_pid_tgid()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(pub u64);

impl Identity {
    #[must_use]
    pub fn new(tgid: u32, pid: u32) -> Self {
        Self((u64::from(tgid) << 32) | u64::from(pid))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tgid(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn pid(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TGID:{} PID:{}", self.tgid(), self.pid())
    }
}

/// Which side of a function a hook fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Function entry (`fentry`), starts a measurement
    Entry,
    /// Function exit (`fexit`), completes a measurement
    Exit,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Entry => write!(f, "entry"),
            HookKind::Exit => write!(f, "exit"),
        }
    }
}

/// Lifecycle state of a named trace
///
/// `Absent → Created → Active → Removed`. `Created` only exists while
/// `create` is running; `Removed` is terminal for the name's previous life
/// (the name itself becomes `Absent` again and may be reused).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceState {
    Absent,
    Created,
    Active,
    Removed,
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TraceState::Absent => "absent",
            TraceState::Created => "created",
            TraceState::Active => "active",
            TraceState::Removed => "removed",
        };
        f.write_str(s)
    }
}
