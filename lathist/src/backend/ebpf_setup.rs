//! # eBPF Program Loading and Attachment
//!
//! Loads the compiled eBPF object once per trace and attaches its two
//! programs to kernel functions.
//!
//! ## Steps
//!
//! 1. [`AyaRegistrar::allocate`] - read the object, patch `FRAC_BITS`, load it
//!    (this creates the maps), zero the slot map, write the precision record
//! 2. [`AyaRegistrar::register`] - load `lat_start` as fentry / `lat_end` as
//!    fexit against kernel BTF for the requested symbol, then attach
//!
//! Nothing is pinned here; `BpfFs::attach` does that. Dropping a
//! [`LoadedTrace`] before it is pinned detaches its programs.

use std::fs;
use std::path::PathBuf;

use aya::{
    maps::{Array, PerCpuArray, PerCpuValues},
    programs::{fentry::FEntryLinkId, fexit::FExitLinkId, FEntry, FExit},
    Btf, Ebpf, EbpfLoader,
};
use lathist_common::{Slot, END_PROGRAM, FRAC_BITS_GLOBAL, FRAC_BITS_MAP, SLOTS_MAP, START_PROGRAM};
use log::{debug, info};

use super::cpu_utils::possible_cpus;
use crate::domain::{FracBits, HookKind, TraceError};
use crate::lifecycle::HookRegistrar;

/// Where `cargo xtask build-ebpf` leaves the object
///
/// Always the release build: debug builds with recent Rust nightlies pull in
/// formatting code (`LowerHex`) that the BPF linker rejects.
pub const DEFAULT_BPF_OBJECT: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/../target/bpfel-unknown-none/release/lathist");

/// A loaded eBPF object plus the links of its attached programs
pub struct LoadedTrace {
    pub(crate) ebpf: Ebpf,
    pub(crate) start_link: Option<FEntryLinkId>,
    pub(crate) end_link: Option<FExitLinkId>,
}

/// [`HookRegistrar`] backed by the kernel via aya
pub struct AyaRegistrar {
    object_path: PathBuf,
    btf: Option<Btf>,
}

impl AyaRegistrar {
    pub fn new(object_path: impl Into<PathBuf>) -> Self {
        Self { object_path: object_path.into(), btf: None }
    }

    /// Kernel BTF, parsed on first use
    fn btf(&mut self) -> Result<&Btf, String> {
        if self.btf.is_none() {
            let btf = Btf::from_sys_fs().map_err(|e| format!("kernel BTF unavailable: {e}"))?;
            self.btf = Some(btf);
        }
        self.btf.as_ref().ok_or_else(|| "kernel BTF unavailable".to_string())
    }
}

impl HookRegistrar for AyaRegistrar {
    type Object = LoadedTrace;

    fn allocate(&mut self, frac_bits: FracBits) -> Result<LoadedTrace, TraceError> {
        let bytes = fs::read(&self.object_path).map_err(|e| {
            TraceError::Allocation(format!(
                "cannot read eBPF object {}: {e} (run `cargo xtask build-ebpf`)",
                self.object_path.display()
            ))
        })?;

        let bits = frac_bits.get();
        let mut ebpf = EbpfLoader::new().set_global(FRAC_BITS_GLOBAL, &bits, true).load(&bytes)?;
        debug!("Loaded {} with frac_bits {bits}", self.object_path.display());

        // Maps start zeroed, but make it explicit for every possible CPU
        let ncpus = possible_cpus()?.len();
        let mut slots: PerCpuArray<_, Slot> = PerCpuArray::try_from(
            ebpf.map_mut(SLOTS_MAP)
                .ok_or_else(|| TraceError::Allocation(format!("{SLOTS_MAP} map not found")))?,
        )?;
        for index in 0..frac_bits.n_slots() {
            slots.set(index, PerCpuValues::try_from(vec![Slot::default(); ncpus])?, 0)?;
        }

        // Readers recover the precision from this map
        let mut record: Array<_, u32> = Array::try_from(
            ebpf.map_mut(FRAC_BITS_MAP)
                .ok_or_else(|| TraceError::Allocation(format!("{FRAC_BITS_MAP} map not found")))?,
        )?;
        record.set(0, bits, 0)?;

        info!("✓ Allocated histogram: {} slots x {ncpus} CPUs", frac_bits.n_slots());
        Ok(LoadedTrace { ebpf, start_link: None, end_link: None })
    }

    fn register(
        &mut self,
        object: &mut LoadedTrace,
        symbol: &str,
        kind: HookKind,
    ) -> Result<(), TraceError> {
        let attach_failed = |reason: String| TraceError::HookAttachFailed {
            symbol: symbol.to_string(),
            kind,
            reason,
        };
        let btf = self.btf().map_err(attach_failed)?;

        match kind {
            HookKind::Entry => {
                let program: &mut FEntry = object
                    .ebpf
                    .program_mut(START_PROGRAM)
                    .ok_or_else(|| attach_failed(format!("{START_PROGRAM} program not found")))?
                    .try_into()?;
                program.load(symbol, btf).map_err(|e| attach_failed(e.to_string()))?;
                let link = program.attach().map_err(|e| attach_failed(e.to_string()))?;
                object.start_link = Some(link);
            }
            HookKind::Exit => {
                let program: &mut FExit = object
                    .ebpf
                    .program_mut(END_PROGRAM)
                    .ok_or_else(|| attach_failed(format!("{END_PROGRAM} program not found")))?
                    .try_into()?;
                program.load(symbol, btf).map_err(|e| attach_failed(e.to_string()))?;
                let link = program.attach().map_err(|e| attach_failed(e.to_string()))?;
                object.end_link = Some(link);
            }
        }

        info!("✓ Attached {kind} hook: {symbol}");
        Ok(())
    }
}
