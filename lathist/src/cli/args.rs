//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::backend::{DEFAULT_BPF_OBJECT, DEFAULT_PIN_ROOT};
use crate::lifecycle::TraceSpec;

#[derive(Parser)]
#[command(
    name = "lathist",
    about = "Persistent in-kernel latency histograms for kernel functions",
    after_help = "\
EXAMPLES:
    sudo lathist trace msleep                         Time msleep, 1 slot per power of two
    sudo lathist trace rw bits 2 start vfs_read       Time vfs_read, 4 slots per power of two
    sudo lathist read msleep --watch 1                Print the histogram every second
    sudo lathist remove msleep                        Detach and delete the trace"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// bpffs directory that holds one subdirectory per trace
    #[arg(long, global = true, env = "LATHIST_PIN_ROOT", default_value = DEFAULT_PIN_ROOT)]
    pub pin_root: PathBuf,

    /// Compiled eBPF object (build with `cargo xtask build-ebpf`)
    #[arg(long, global = true, env = "LATHIST_BPF_OBJECT", default_value = DEFAULT_BPF_OBJECT)]
    pub bpf_object: PathBuf,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create a trace: `trace NAME [bits 0-3] [start SYMBOL] [end SYMBOL]`
    Trace {
        name: String,
        /// KEY VALUE pairs
        #[arg(value_name = "KEY VALUE", trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Detach a trace and delete its histogram
    Remove { name: String },
    /// Print the per-CPU and merged histogram of a trace
    Read {
        name: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Re-read every SECS seconds until Ctrl+C
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Print all trace names, one per line
    List,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("Unknown option '{0}' (expected bits, start or end)")]
    UnknownKey(String),

    #[error("Option '{0}' needs a value")]
    MissingValue(String),

    #[error("Invalid bits '{0}': expected an integer between 0 and 3")]
    InvalidBits(String),
}

/// Turn `trace` KEY VALUE pairs into a [`TraceSpec`]
///
/// Keys are case-insensitive and may come in any order; a repeated key wins
/// over earlier occurrences. Range checks on `bits` happen in
/// [`TraceManager::create`](crate::lifecycle::TraceManager::create).
///
/// # Errors
/// Returns a [`UsageError`] for an unknown key, a key without a value, or a
/// non-numeric `bits`
pub fn parse_trace_options(name: &str, options: &[String]) -> Result<TraceSpec, UsageError> {
    let mut spec = TraceSpec::new(name);
    let mut pairs = options.iter();

    while let Some(key) = pairs.next() {
        let value = pairs.next().ok_or_else(|| UsageError::MissingValue(key.clone()))?;
        match key.to_ascii_lowercase().as_str() {
            "bits" => {
                let bits = value.parse().map_err(|_| UsageError::InvalidBits(value.clone()))?;
                spec = spec.bits(bits);
            }
            "start" => spec = spec.start(value.as_str()),
            "end" => spec = spec.end(value.as_str()),
            _ => return Err(UsageError::UnknownKey(key.clone())),
        }
    }
    Ok(spec)
}
