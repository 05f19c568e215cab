//! # eBPF Kernel-Side Measurement
//!
//! Two programs that bracket a traced function and feed a per-CPU histogram.
//!
//! ## Programs
//!
//! - **fentry**: `lat_start` - Record the start timestamp for the current thread
//! - **fexit**: `lat_end` - Compute elapsed time, encode it, bump the CPU-local slot
//!
//! The attach targets are not baked in: userspace picks the kernel function for
//! each program at load time (`FEntry::load(symbol, &btf)`).
//!
//! ## Maps (Pinned by Userspace)
//!
//! - `PENDING_STARTS` - `pid_tgid` → start timestamp (in-flight measurements)
//! - `SLOTS` - Per-CPU histogram, one [`Slot`] per encoded index
//! - `FRAC_BITS_RECORD` - Precision, kept so readers never need it out of band
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns},
    macros::{fentry, fexit, map},
    maps::{Array, HashMap, PerCpuArray},
    programs::{FEntryContext, FExitContext},
};
use lathist_common::{
    bucket_of, encode, sum_contribution, Slot, FRAC_BITS_UNSET, MAX_FRAC_BITS, MAX_SLOTS,
    PENDING_CAPACITY,
};

// ============================================================================
// Configuration
// ============================================================================

/// Precision, patched by the loader via `EbpfLoader::set_global`
///
/// Stays at `FRAC_BITS_UNSET` (`u32::MAX`) if the loader forgot, in which case
/// every measurement is dropped rather than written to the wrong slot.
#[no_mangle]
static FRAC_BITS: u32 = FRAC_BITS_UNSET;

// ============================================================================
// eBPF Maps
// ============================================================================

/// Map: `pid_tgid` → start timestamp (ns)
///
/// Written by `lat_start`, consumed (looked up and deleted) by `lat_end`.
/// A second start for the same thread overwrites the first.
#[map]
static PENDING_STARTS: HashMap<u64, u64> = HashMap::with_max_entries(PENDING_CAPACITY, 0);

/// Histogram storage, one independent copy per CPU
///
/// Sized for the finest precision; coarser traces only touch a prefix.
#[map]
static SLOTS: PerCpuArray<Slot> = PerCpuArray::with_max_entries(MAX_SLOTS, 0);

/// Key 0: precision this object was loaded with (written by userspace)
#[map]
static FRAC_BITS_RECORD: Array<u32> = Array::with_max_entries(1, 0);

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: entry of the start target
#[fentry]
pub fn lat_start(_ctx: FEntryContext) -> u32 {
    match try_lat_start() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_lat_start() -> Result<(), i64> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let now = unsafe { bpf_ktime_get_ns() };

    // BPF_ANY: a stale unmatched start is simply superseded
    unsafe {
        PENDING_STARTS.insert(&pid_tgid, &now, 0)?;
    }

    Ok(())
}

/// Hook: exit of the end target
#[fexit]
pub fn lat_end(_ctx: FExitContext) -> u32 {
    match try_lat_end() {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_lat_end() -> Result<(), i64> {
    let now = unsafe { bpf_ktime_get_ns() };
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };

    // No pending start (forked child, or started before attach): drop silently
    let Some(start) = (unsafe { PENDING_STARTS.get(&pid_tgid).copied() }) else {
        return Ok(());
    };
    let _ = unsafe { PENDING_STARTS.remove(&pid_tgid) };

    let frac_bits = unsafe { core::ptr::read_volatile(&FRAC_BITS) };
    if frac_bits > MAX_FRAC_BITS {
        return Ok(());
    }

    let elapsed = now.wrapping_sub(start);
    let bucket = bucket_of(elapsed, frac_bits);
    let slot = encode(elapsed, frac_bits);

    // The verifier insists on the null check even though slot < MAX_SLOTS
    let cell = SLOTS.get_ptr_mut(slot).ok_or(1i64)?;

    // Per-CPU storage, but a nested handler on this CPU can still interleave
    unsafe {
        AtomicU64::from_ptr(core::ptr::addr_of_mut!((*cell).samples))
            .fetch_add(1, Ordering::Relaxed);
        AtomicU64::from_ptr(core::ptr::addr_of_mut!((*cell).sum))
            .fetch_add(sum_contribution(elapsed, bucket), Ordering::Relaxed);
    }

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
