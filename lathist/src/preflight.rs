//! Pre-flight checks for lathist
//!
//! Validates system requirements before any eBPF object is loaded or pinned.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid(), statfs() and setrlimit() require unsafe

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, warn};

/// fentry/fexit need BPF trampolines (Linux 5.5)
const MIN_KERNEL_VERSION: (u32, u32) = (5, 5);

/// `BPF_FS_MAGIC` from `linux/magic.h`
const BPF_FS_MAGIC: i64 = 0xcafe_4a11;

/// Run every check needed before creating or reading traces under `pin_root`
///
/// The bpffs check looks at the closest existing ancestor of `pin_root`, since
/// the root itself may not have been created yet.
pub fn run_preflight_checks(pin_root: &Path, quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_bpffs(pin_root, quiet)?;
    bump_memlock_rlimit();
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would do too, but checking capabilities needs
    // another dependency
    bail!(
        "Permission denied: lathist requires root privileges to load and pin eBPF programs.\n\n\
         Run with: sudo lathist ..."
    );
}

/// Check if the kernel version is sufficient for fentry/fexit
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let Some((major, minor, release)) = parse_kernel_version(&version_str) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             lathist requires Linux {}.{} or newer for fentry/fexit support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Parse "Linux version 5.15.0-generic ..." into (5, 15, "5.15.0-generic")
fn parse_kernel_version(version_str: &str) -> Option<(u32, u32, &str)> {
    let release = version_str.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?, release))
}

/// Check that pins under `pin_root` will land on a BPF filesystem
fn check_bpffs(pin_root: &Path, quiet: bool) -> Result<()> {
    let Some(existing) = pin_root.ancestors().find(|p| p.exists()) else {
        return Ok(());
    };

    let path = CString::new(existing.as_os_str().as_bytes())
        .with_context(|| format!("Invalid path: {}", existing.display()))?;
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(path.as_ptr(), &mut stat) } != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to statfs {}", existing.display()));
    }

    #[allow(clippy::unnecessary_cast, clippy::cast_lossless, clippy::cast_possible_wrap)]
    let fs_type = stat.f_type as i64;
    if fs_type != BPF_FS_MAGIC {
        if !quiet {
            warn!("{} is not on a bpffs mount", existing.display());
        }
        bail!(
            "Pin root {} is not on a BPF filesystem.\n\n\
             Mount one with: sudo mount -t bpf bpf /sys/fs/bpf\n\
             or choose another location with --pin-root",
            pin_root.display()
        );
    }

    debug!("{} is on bpffs", existing.display());
    Ok(())
}

/// Lift the locked-memory limit; kernels before 5.11 charge BPF maps to it
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) } != 0 {
        warn!("Failed to remove RLIMIT_MEMLOCK: {}", std::io::Error::last_os_error());
    }
}
