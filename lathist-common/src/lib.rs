//! # Shared Histogram Encoding (eBPF ↔ Userspace)
//!
//! Defines the logarithmic slot encoding and the slot layout shared between the
//! kernel-side eBPF programs and userspace. Everything here is `no_std` and
//! `const`-friendly so the eBPF end handler and the userspace reader agree
//! bit-for-bit on where a duration lands.
//!
//! ## Encoding
//!
//! A duration is split like a tiny floating point number:
//!
//! ```text
//!   bucket   = bit_len(value >> frac_bits)          (exponent)
//!   mantissa = the frac_bits bits below the leading one
//!   slot     = (bucket << frac_bits) | mantissa
//! ```
//!
//! Values below `2^frac_bits` land in bucket 0 and keep exact resolution
//! (`slot == value`).
//!
//! ## Key Types
//!
//! - [`Slot`] - One histogram cell (sample count + compressed sum)
//! - [`encode`] - Duration → slot index
//! - [`n_slots`] - Histogram length for a given precision

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Constants
// ============================================================================

/// Bit width of the duration type (`u64` nanoseconds)
pub const VALUE_BITS: u32 = 64;

/// Largest supported precision (extra mantissa bits per power of two)
pub const MAX_FRAC_BITS: u32 = 3;

/// Bucket index from which sums are right-shifted before accumulation
///
/// Durations in bucket `b >= SUM_SCALE` contribute `value >> (b - SUM_SCALE)`,
/// so a sum never needs more than roughly `SUM_SCALE` significant bits per sample.
pub const SUM_SCALE: u32 = 20;

/// Size of the kernel slot map: large enough for the finest precision
pub const MAX_SLOTS: u32 = n_slots(MAX_FRAC_BITS);

/// Maximum number of in-flight start timestamps in the kernel pending map
pub const PENDING_CAPACITY: u32 = 4096;

/// Value of the `FRAC_BITS` global before the loader patches it
pub const FRAC_BITS_UNSET: u32 = u32::MAX;

// ============================================================================
// Object Names (eBPF program ↔ loader)
// ============================================================================

/// `fentry` program recording start timestamps
pub const START_PROGRAM: &str = "lat_start";

/// `fexit` program completing measurements
pub const END_PROGRAM: &str = "lat_end";

/// Per-CPU array of [`Slot`]s
pub const SLOTS_MAP: &str = "SLOTS";

/// Single-entry array holding the configured precision
pub const FRAC_BITS_MAP: &str = "FRAC_BITS_RECORD";

/// Hash map: `pid_tgid` → start timestamp
pub const PENDING_MAP: &str = "PENDING_STARTS";

/// Read-only global patched with the precision before load
pub const FRAC_BITS_GLOBAL: &str = "FRAC_BITS";

// ============================================================================
// Shared Data Structures
// ============================================================================

/// One histogram cell
///
/// `sum` is compressed: for slots in bucket `b >= SUM_SCALE` every contribution
/// was shifted right by `b - SUM_SCALE`. Use [`sum_shift`] to rescale.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    /// Completed measurements that landed in this slot
    pub samples: u64,

    /// Compressed running total of their durations
    pub sum: u64,
}

// ============================================================================
// Encoder
// ============================================================================

/// Number of histogram slots for a precision: `((W - p + 1) << p) + 1`
#[must_use]
pub const fn n_slots(frac_bits: u32) -> u32 {
    ((VALUE_BITS - frac_bits + 1) << frac_bits) + 1
}

/// Mask selecting the `frac_bits` mantissa bits
#[must_use]
pub const fn frac_mask(frac_bits: u32) -> u32 {
    (1 << frac_bits) - 1
}

/// Bits needed to represent `value` (0 for 0)
#[must_use]
pub const fn bit_len(value: u64) -> u32 {
    VALUE_BITS - value.leading_zeros()
}

/// Exponent part of the encoding
#[must_use]
pub const fn bucket_of(value: u64, frac_bits: u32) -> u32 {
    bit_len(value >> frac_bits)
}

/// Map a duration to its slot index, clamped to `n_slots(frac_bits) - 1`
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn encode(value: u64, frac_bits: u32) -> u32 {
    let bucket = bucket_of(value, frac_bits);
    let slot = if bucket == 0 {
        // value < 2^frac_bits <= 8
        value as u32
    } else {
        let mantissa = ((value >> (bucket - 1)) & frac_mask(frac_bits) as u64) as u32;
        (bucket << frac_bits) | mantissa
    };

    let last = n_slots(frac_bits) - 1;
    if slot > last {
        last
    } else {
        slot
    }
}

/// Amount added to a slot's `sum` for a duration in `bucket`
#[must_use]
pub const fn sum_contribution(value: u64, bucket: u32) -> u64 {
    if bucket < SUM_SCALE {
        value
    } else {
        value >> (bucket - SUM_SCALE)
    }
}

/// Exponent of a slot index
#[must_use]
pub const fn slot_bucket(slot: u32, frac_bits: u32) -> u32 {
    slot >> frac_bits
}

/// Left shift that undoes [`sum_contribution`] for every value in `slot`
#[must_use]
pub const fn sum_shift(slot: u32, frac_bits: u32) -> u32 {
    let bucket = slot_bucket(slot, frac_bits);
    if bucket < SUM_SCALE {
        0
    } else {
        bucket - SUM_SCALE
    }
}

/// Smallest duration that encodes to `slot`
#[must_use]
pub const fn slot_lower_bound(slot: u32, frac_bits: u32) -> u64 {
    let bucket = slot_bucket(slot, frac_bits);
    if bucket == 0 {
        return slot as u64;
    }
    let mantissa = (slot & frac_mask(frac_bits)) as u64;
    ((1u64 << frac_bits) | mantissa) << (bucket - 1)
}

#[cfg(feature = "user")]
use aya::Pod;

// Slot is read from per-CPU maps as plain bytes
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for Slot {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_n_slots_formula() {
        assert_eq!(n_slots(0), 66);
        assert_eq!(n_slots(1), 129);
        assert_eq!(n_slots(2), 253);
        assert_eq!(n_slots(3), 497);
        for p in 0..=MAX_FRAC_BITS {
            assert_eq!(n_slots(p), ((64 - p + 1) << p) + 1);
        }
        assert_eq!(MAX_SLOTS, 497);
    }

    #[test]
    fn test_zero_encodes_to_slot_zero() {
        for p in 0..=MAX_FRAC_BITS {
            assert_eq!(encode(0, p), 0);
            assert_eq!(bucket_of(0, p), 0);
        }
    }

    #[test]
    fn test_exact_region_is_identity() {
        for p in 0..=MAX_FRAC_BITS {
            for v in 0..(1u64 << p) {
                assert_eq!(encode(v, p), u32::try_from(v).unwrap());
            }
        }
    }

    #[test]
    fn test_encode_in_range_and_monotonic() {
        for p in 0..=MAX_FRAC_BITS {
            let mut prev = 0;
            for v in 0..100_000u64 {
                let slot = encode(v, p);
                assert!(slot < n_slots(p), "slot {slot} out of range for p={p}");
                assert!(slot >= prev, "not monotonic at v={v} p={p}");
                prev = slot;
            }
            for shift in 1..64 {
                let base = 1u64 << shift;
                for v in [base - 1, base, base + 1, base | (base >> 1)] {
                    assert!(encode(v, p) < n_slots(p));
                }
            }
        }
    }

    #[test]
    fn test_monotonic_across_powers_of_two() {
        for p in 0..=MAX_FRAC_BITS {
            let mut prev = 0;
            for shift in 0..64 {
                let v = 1u64 << shift;
                assert!(encode(v - 1, p) <= encode(v, p));
                assert!(encode(v, p) >= prev);
                prev = encode(v, p);
            }
            assert!(encode(u64::MAX, p) >= prev);
        }
    }

    #[test]
    fn test_max_value_fits() {
        for p in 0..=MAX_FRAC_BITS {
            assert_eq!(encode(u64::MAX, p), n_slots(p) - 2);
        }
    }

    #[test]
    fn test_known_slots() {
        // 1ms with no extra precision: bit_len(1_000_000) == 20
        assert_eq!(encode(1_000_000, 0), 20);
        // 1s: bit_len(1_000_000_000) == 30
        assert_eq!(encode(1_000_000_000, 0), 30);
        // 12 = 0b1100 with p=2: bucket = bit_len(3) = 2, mantissa = (12 >> 1) & 3 = 2
        assert_eq!(encode(12, 2), (2 << 2) | 2);
    }

    #[test]
    fn test_lower_bound_encodes_back() {
        for p in 0..=MAX_FRAC_BITS {
            for slot in 0..n_slots(p) - 1 {
                let low = slot_lower_bound(slot, p);
                assert_eq!(encode(low, p), slot, "slot {slot} p={p} low={low}");
                if low > 0 {
                    assert!(encode(low - 1, p) < slot);
                }
            }
        }
    }

    #[test]
    fn test_sum_compression_roundtrip() {
        let value = 5_000_000_000u64; // bit_len == 33
        let bucket = bucket_of(value, 0);
        assert_eq!(bucket, 33);
        let contribution = sum_contribution(value, bucket);
        assert_eq!(contribution, value >> 13);
        let slot = encode(value, 0);
        assert_eq!(sum_shift(slot, 0), 13);
        let restored = contribution << sum_shift(slot, 0);
        assert!(value - restored < (1 << 13));
    }

    #[test]
    fn test_small_values_not_compressed() {
        assert_eq!(sum_contribution(1_000, bucket_of(1_000, 0)), 1_000);
        assert_eq!(sum_shift(encode(1_000_000, 0), 0), 0);
    }
}
