//! Parallelism and count scaling helpers.

/// Effective parallelism from an attribute value: `floor(value)`, at least 1.
/// Non-finite values map to 1.
pub fn parallelism(value: f64) -> u64 {
    if !value.is_finite() {
        return 1;
    }
    let floored = value.floor();
    if floored < 1.0 {
        return 1;
    }
    // `as` saturates for values beyond u64::MAX.
    floored as u64
}

/// Scale `base` by `k` copies. Counts `<= 0` and factors `<= 1` are returned
/// unchanged; an overflowing product saturates at `i64::MAX`.
pub fn scale_count(base: i64, k: u64) -> i64 {
    if base <= 0 || k <= 1 {
        return base;
    }
    let Ok(k) = i64::try_from(k) else {
        return i64::MAX;
    };
    saturating_mul(base, k)
}

/// Multiply two non-negative counts, saturating at `i64::MAX`.
pub fn saturating_mul(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    a.checked_mul(b).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_floors_and_clamps() {
        assert_eq!(parallelism(1.0), 1);
        assert_eq!(parallelism(3.9), 3);
        assert_eq!(parallelism(0.5), 1);
        assert_eq!(parallelism(-4.0), 1);
    }

    #[test]
    fn parallelism_non_finite_is_one() {
        assert_eq!(parallelism(f64::NAN), 1);
        assert_eq!(parallelism(f64::INFINITY), 1);
        assert_eq!(parallelism(f64::NEG_INFINITY), 1);
    }

    #[test]
    fn scale_count_passes_through_trivial_cases() {
        assert_eq!(scale_count(0, 10), 0);
        assert_eq!(scale_count(-5, 10), -5);
        assert_eq!(scale_count(7, 1), 7);
        assert_eq!(scale_count(7, 0), 7);
    }

    #[test]
    fn scale_count_multiplies() {
        assert_eq!(scale_count(7, 3), 21);
    }

    #[test]
    fn scale_count_saturates_instead_of_wrapping() {
        assert_eq!(scale_count(i64::MAX / 2 + 1, 2), i64::MAX);
        assert_eq!(scale_count(2, u64::MAX), i64::MAX);
    }
}
