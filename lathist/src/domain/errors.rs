//! Structured error types for lathist
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::fmt;

use thiserror::Error;

use super::types::{HookKind, TraceName};
use crate::lifecycle::Artifact;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Invalid precision {0}: number of bits should be between 0 and 3")]
    InvalidPrecision(u32),

    #[error("Invalid trace name {0:?}: must be a single non-empty path component")]
    InvalidName(String),

    #[error("Trace {0} already exists")]
    DuplicateTrace(TraceName),

    #[error("Trace {0} not found")]
    NotFound(TraceName),

    #[error("Failed to register hooks: {0}")]
    HookRegistration(HookFailures),

    #[error("Failed to attach {kind} hook to {symbol}: {reason}")]
    HookAttachFailed { symbol: String, kind: HookKind, reason: String },

    #[error("Failed to allocate histogram: {0}")]
    Allocation(String),

    #[error("Failed to persist {artifact} of trace {name}: {reason}")]
    Persist { name: TraceName, artifact: Artifact, reason: String },

    #[error("Failed to remove trace container {name}: {source}")]
    TeardownFailed {
        name: TraceName,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ebpf(#[from] aya::EbpfError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),
}

impl TraceError {
    /// True for errors caused by bad input rather than the system
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, TraceError::InvalidPrecision(_) | TraceError::InvalidName(_))
    }
}

/// Which of the two hooks of a trace failed to register, and why
///
/// Both hooks are always attempted so the caller sees every problem at once.
#[derive(Debug, Default)]
pub struct HookFailures {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl HookFailures {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

impl fmt::Display for HookFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => write!(f, "start: {start}; end: {end}"),
            (Some(start), None) => write!(f, "start: {start}"),
            (None, Some(end)) => write!(f, "end: {end}"),
            (None, None) => write!(f, "no failures"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = TraceError::NotFound(TraceName::new("sleep").unwrap());
        assert_eq!(err.to_string(), "Trace sleep not found");
    }

    #[test]
    fn test_hook_failures_report_both() {
        let err = TraceError::HookRegistration(HookFailures {
            start: Some("no_such_fn: symbol not found".to_string()),
            end: Some("other_fn: symbol not found".to_string()),
        });
        let msg = err.to_string();
        assert!(msg.contains("start: no_such_fn"));
        assert!(msg.contains("end: other_fn"));
    }

    #[test]
    fn test_hook_attach_display() {
        let err = TraceError::HookAttachFailed {
            symbol: "msleep".to_string(),
            kind: HookKind::Exit,
            reason: "not in BTF".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to attach exit hook to msleep: not in BTF");
    }

    #[test]
    fn test_config_errors() {
        assert!(TraceError::InvalidPrecision(4).is_config_error());
        assert!(TraceError::InvalidName(String::new()).is_config_error());
        assert!(!TraceError::NotFound(TraceName::new("x").unwrap()).is_config_error());
    }
}
