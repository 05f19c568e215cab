//! Collaborator implementations
//!
//! - [`AyaRegistrar`] + [`BpfFs`]: real kernel hooks pinned under bpffs
//! - [`SimKernel`] + [`SimStore`]: in-process runtime for tests

pub mod bpffs;
pub mod cpu_utils;
pub mod ebpf_setup;
pub mod sim;

pub use bpffs::{BpfFs, TraceNames, DEFAULT_PIN_ROOT};
pub use cpu_utils::{parse_cpu_list, possible_cpus};
pub use ebpf_setup::{AyaRegistrar, LoadedTrace, DEFAULT_BPF_OBJECT};
pub use sim::{SimHook, SimKernel, SimStore, SimTrace};
