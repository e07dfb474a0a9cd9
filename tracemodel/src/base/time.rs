//! Tolerant timestamp comparisons.
//!
//! Slice ends are recomputed as `start + duration`, so an end read from a
//! trace can come back a few ulps away from the original timestamp. Two
//! slices closed by the same event must still compare as ending together.

/// A few ulps at the magnitude of the operands.
const RELATIVE_TOLERANCE: f64 = 4.0 * f64::EPSILON;
/// One picosecond; far below any trace clock resolution.
const ABSOLUTE_TOLERANCE: f64 = 1e-9;

fn tolerance(a: f64, b: f64) -> f64 {
    (RELATIVE_TOLERANCE * a.abs().max(b.abs())).max(ABSOLUTE_TOLERANCE)
}

/// `a == b` up to rounding error.
pub fn time_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= tolerance(a, b)
}

/// `a < b`, with values equal up to rounding error counting as equal.
pub fn time_lt(a: f64, b: f64) -> bool {
    a < b && !time_eq(a, b)
}

/// `a <= b`, with values equal up to rounding error counting as equal.
pub fn time_le(a: f64, b: f64) -> bool {
    a <= b || time_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recomputed_end_matches_original() {
        let (start, end) = (0.001_f64, 0.018_f64);
        let recomputed = start + (end - start);
        assert!(time_eq(recomputed, end));
        assert!(time_le(recomputed, end));
        assert!(!time_lt(end, recomputed));
    }

    #[test]
    fn test_real_differences_are_kept() {
        assert!(time_lt(1.0, 1.000_001));
        assert!(!time_le(1.000_001, 1.0));
        assert!(!time_eq(0.0, 1e-6));
    }

    #[test]
    fn test_tolerance_scales_with_magnitude() {
        let base = 1.7e12;
        assert!(time_eq(base, base + base * f64::EPSILON));
        assert!(time_lt(base, base + 1.0));
    }
}
