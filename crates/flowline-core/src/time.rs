//! Simulation time and tolerant comparisons.
//!
//! All time arithmetic is done in 64-bit IEEE-754 seconds. Repeated addition
//! of small deltas accumulates error, so equality and ordering comparisons
//! between times use a fixed tolerance rather than bit equality.

/// Simulation time in seconds.
pub type SimTime = f64;

/// Tolerance used when comparing simulation times.
pub const TOLERANCE: SimTime = 0.00001;

/// Equal within tolerance.
pub fn approx_eq(lhs: SimTime, rhs: SimTime) -> bool {
    (lhs - rhs).abs() < TOLERANCE
}

/// Strictly greater, beyond tolerance.
pub fn approx_gt(lhs: SimTime, rhs: SimTime) -> bool {
    lhs - rhs > TOLERANCE
}

/// Strictly less, beyond tolerance.
pub fn approx_lt(lhs: SimTime, rhs: SimTime) -> bool {
    rhs - lhs > TOLERANCE
}

/// Greater than or equal within tolerance.
pub fn approx_ge(lhs: SimTime, rhs: SimTime) -> bool {
    !approx_lt(lhs, rhs)
}

/// Less than or equal within tolerance.
pub fn approx_le(lhs: SimTime, rhs: SimTime) -> bool {
    !approx_gt(lhs, rhs)
}

// ---------------------------------------------------------------------------
// Replication summaries
// ---------------------------------------------------------------------------

/// Mean of a set of replication values. Empty input yields 0.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation using the n-1 method, since replication values are a
/// sample rather than the complete population.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Half-width of an approximate 95% confidence interval around the mean.
pub fn confidence_interval(n: f64, std_dev: f64) -> f64 {
    if n < 2.0 {
        return 0.0;
    }
    1.96 * std_dev / n.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerant_equality() {
        assert!(approx_eq(1.0, 1.0 + TOLERANCE / 2.0));
        assert!(!approx_eq(1.0, 1.0 + TOLERANCE * 2.0));
    }

    #[test]
    fn tolerant_ordering() {
        assert!(approx_gt(1.0 + 2.0 * TOLERANCE, 1.0));
        assert!(!approx_gt(1.0 + TOLERANCE / 2.0, 1.0));
        assert!(approx_ge(1.0, 1.0 + TOLERANCE / 2.0));
        assert!(approx_le(1.0, 1.0 - TOLERANCE / 2.0));
    }

    #[test]
    fn accumulated_deltas_compare_equal() {
        let mut t = 0.0;
        for _ in 0..10 {
            t += 0.1;
        }
        assert!(approx_eq(t, 1.0));
    }

    #[test]
    fn replication_summary() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert!((m - 5.0).abs() < 1e-12);
        let sd = std_dev(&values, m);
        assert!((sd - 2.138089935299395).abs() < 1e-9);
    }

    #[test]
    fn empty_replications_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[], 0.0), 0.0);
        assert_eq!(confidence_interval(1.0, 1.0), 0.0);
    }
}
