//! Element-wise agreement check between two score vectors.

use std::fmt;

use anyhow::{Result, bail};
use tracing::{info, warn};

/// Summary of a comparison, returned on success and embedded in the error on
/// failure.
#[derive(Clone, Debug, PartialEq)]
pub struct ComparisonReport {
    pub decimal: u32,
    pub total: usize,
    pub mismatched: usize,
    pub max_abs_diff: f64,
    pub max_rel_diff: f64,
}

impl ComparisonReport {
    pub fn passed(&self) -> bool {
        self.mismatched == 0
    }

    /// `1.5 * 10^-decimal`.
    pub fn tolerance(&self) -> f64 {
        tolerance(self.decimal)
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = if self.total == 0 {
            0.0
        } else {
            100.0 * self.mismatched as f64 / self.total as f64
        };
        write!(
            f,
            "Arrays are not almost equal to {} decimals\n\
             Mismatched elements: {} / {} ({:.3}%)\n\
             Max absolute difference: {:e}\n\
             Max relative difference: {:e}",
            self.decimal, self.mismatched, self.total, pct, self.max_abs_diff, self.max_rel_diff
        )
    }
}

pub fn tolerance(decimal: u32) -> f64 {
    1.5 * 10f64.powi(-(decimal as i32))
}

/// Passes iff the lengths match and `|expected - actual| < 1.5 * 10^-decimal`
/// for every element. Positions where both sides are NaN count as equal.
pub fn assert_array_almost_equal(
    expected: &[f32],
    actual: &[f32],
    decimal: u32,
) -> Result<ComparisonReport> {
    if expected.len() != actual.len() {
        bail!(
            "Arrays are not almost equal to {} decimals\n(shapes ({},), ({},) mismatch)",
            decimal,
            expected.len(),
            actual.len()
        );
    }

    let tol = tolerance(decimal);
    let mut report = ComparisonReport {
        decimal,
        total: expected.len(),
        mismatched: 0,
        max_abs_diff: 0.0,
        max_rel_diff: 0.0,
    };

    for (&e, &a) in expected.iter().zip(actual) {
        if e.is_nan() && a.is_nan() {
            continue;
        }
        let (e, a) = (f64::from(e), f64::from(a));
        let diff = (e - a).abs();
        if diff.is_nan() || diff >= tol {
            report.mismatched += 1;
        }
        if diff.is_finite() {
            report.max_abs_diff = report.max_abs_diff.max(diff);
            if e != 0.0 {
                report.max_rel_diff = report.max_rel_diff.max(diff / e.abs());
            }
        }
    }

    if !report.passed() {
        warn!(
            mismatched = report.mismatched,
            total = report.total,
            max_abs_diff = report.max_abs_diff,
            "prediction comparison failed"
        );
        bail!("{report}");
    }

    info!(
        total = report.total,
        decimal,
        max_abs_diff = report.max_abs_diff,
        "predictions agree"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_arrays_pass() -> Result<()> {
        let report = assert_array_almost_equal(&[0.1, 0.5, 0.9], &[0.1, 0.5, 0.9], 5)?;
        assert!(report.passed());
        assert_eq!(report.total, 3);
        assert_eq!(report.max_abs_diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_within_tolerance() -> Result<()> {
        // 1e-6 < 1.5e-5
        let report = assert_array_almost_equal(&[0.5], &[0.500001], 5)?;
        assert!(report.max_abs_diff > 0.0);
        Ok(())
    }

    #[test]
    fn test_beyond_tolerance_reports_counts() {
        let err = assert_array_almost_equal(&[0.5, 0.25, 0.75], &[0.5, 0.3, 0.75], 5).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Mismatched elements: 1 / 3"), "{msg}");
        assert!(msg.contains("5 decimals"));
    }

    #[test]
    fn test_decimal_zero_is_loose() -> Result<()> {
        // |0.1 - 0.9| = 0.8 < 1.5
        assert_array_almost_equal(&[0.1], &[0.9], 0)?;
        assert!(assert_array_almost_equal(&[0.0], &[1.6], 0).is_err());
        Ok(())
    }

    #[test]
    fn test_length_mismatch() {
        let err = assert_array_almost_equal(&[0.1, 0.2], &[0.1], 5).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_nan_handling() {
        assert!(assert_array_almost_equal(&[f32::NAN], &[f32::NAN], 5).is_ok());
        assert!(assert_array_almost_equal(&[f32::NAN], &[0.5], 5).is_err());
    }

    #[test]
    fn test_tolerance_values() {
        assert!((tolerance(5) - 1.5e-5).abs() < 1e-18);
        assert_eq!(tolerance(0), 1.5);
    }
}
