//! Command-line interface

pub mod args;

pub use args::{parse_trace_options, Args, Command, UsageError};
