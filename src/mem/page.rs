//! Page-size queries, overflow-checked arithmetic, and alignment helpers.
//!
//! The `Bump` and `Slab` allocators in this module are built over safe,
//! growable `Vec<u8>` backing storage rather than raw page allocation, so
//! the primitives actually needed at runtime are `page_size` (used to size
//! slab banks) and the checked-arithmetic/alignment helpers below.

use crate::error::{Error, Result};

/// The platform's page size, in bytes. Queried once; 4 KiB is used as a
/// portable fallback when the OS call is unavailable (never on a
/// Tier-1 target, but this keeps the function total).
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            return n as usize;
        }
    }
    4096
}

/// Checked `a + b`; `Err(Error::Range)` on overflow.
pub fn checked_add(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b).ok_or(Error::Range)
}

/// Checked `a - b`; `Err(Error::Range)` on underflow.
pub fn checked_sub(a: usize, b: usize) -> Result<usize> {
    a.checked_sub(b).ok_or(Error::Range)
}

/// Checked `a * b`; `Err(Error::Range)` on overflow.
pub fn checked_mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b).ok_or(Error::Range)
}

/// Rounds `value` up to the nearest multiple of `align`.
///
/// `align` must be a power of two; `Err(Error::Dom)` otherwise. Overflowing
/// the rounding arithmetic yields `Err(Error::Range)`.
pub fn align_up(value: usize, align: usize) -> Result<usize> {
    if align == 0 || !align.is_power_of_two() {
        return Err(Error::Dom);
    }
    let mask = align - 1;
    let biased = checked_add(value, mask)?;
    Ok(biased & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_is_idempotent_and_covers() {
        for align in [1usize, 2, 4, 8, 16, 64, 4096] {
            for value in [0usize, 1, align - 1, align, align + 1, 3 * align + 5] {
                let a = align_up(value, align).unwrap();
                assert!(a >= value, "align_up({value}, {align}) = {a} < {value}");
                assert_eq!(a % align, 0, "align_up({value}, {align}) = {a} not aligned");
                // Idempotent.
                assert_eq!(align_up(a, align).unwrap(), a);
            }
        }
    }

    #[test]
    fn align_up_rejects_non_power_of_two() {
        for bad in [0usize, 3, 5, 6, 7, 100] {
            assert_eq!(align_up(8, bad), Err(Error::Dom));
        }
    }

    #[test]
    fn align_up_detects_overflow() {
        assert_eq!(align_up(usize::MAX, 16), Err(Error::Range));
    }

    #[test]
    fn checked_arith_overflow_flags() {
        assert_eq!(checked_add(usize::MAX, 1), Err(Error::Range));
        assert_eq!(checked_sub(0, 1), Err(Error::Range));
        assert_eq!(checked_mul(usize::MAX, 2), Err(Error::Range));
        assert_eq!(checked_add(2, 3), Ok(5));
    }
}
