//! CPU utility functions
//!
//! Utilities for querying CPU information from /sys filesystem.

use std::fs;
use std::io;

use crate::domain::CpuId;

const POSSIBLE_CPUS: &str = "/sys/devices/system/cpu/possible";

/// Get list of possible CPU IDs from /sys/devices/system/cpu/possible
///
/// Per-CPU BPF maps hold one value for every *possible* CPU, not just the
/// online ones, so this is the length every per-CPU value buffer must have.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed
pub fn possible_cpus() -> io::Result<Vec<CpuId>> {
    let content = fs::read_to_string(POSSIBLE_CPUS)?;
    parse_cpu_list(&content)
}

/// Parse a kernel CPU list like "0-3" or "0-3,8-11" or "5"
///
/// # Errors
/// Returns `InvalidData` for anything that is not a CPU list
pub fn parse_cpu_list(content: &str) -> io::Result<Vec<CpuId>> {
    let invalid = |s: &str| io::Error::new(io::ErrorKind::InvalidData, format!("bad CPU list: {s:?}"));
    let parse = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid(content));

    let mut cpus = Vec::new();

    for range in content.trim().split(',') {
        if let Some((start, end)) = range.split_once('-') {
            // Range like "0-3"
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(invalid(content));
            }
            cpus.extend((start..=end).map(CpuId));
        } else {
            // Single CPU like "5"
            cpus.push(CpuId(parse(range)?));
        }
    }

    Ok(cpus)
}
