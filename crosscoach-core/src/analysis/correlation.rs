//! Pairwise correlation over aligned series.

use super::series::Series;
use super::stats;
use crate::error::{Error, Result};
use crate::types::SeriesKey;
use serde::Serialize;

/// Correlation of two series over the dates they share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub series_a: SeriesKey,
    pub series_b: SeriesKey,
    /// Pearson r, in [-1, 1]
    pub r: f64,
    /// Two-sided p-value, in [0, 1]
    pub p_value: f64,
    pub n_overlap: usize,
}

/// Every computed correlation plus skip counts.
#[derive(Debug, Default)]
pub struct CorrelationReport {
    /// Results in pair enumeration order (`i < j` over builder order)
    pub results: Vec<CorrelationResult>,
    /// Pairs for which r and p were computed
    pub pairs_evaluated: usize,
    /// Pairs skipped for sharing too few dates
    pub pairs_insufficient_overlap: usize,
    /// Pairs skipped because one side was constant over the overlap
    pub pairs_degenerate: usize,
}

/// Correlate one pair.
///
/// `Ok(None)` when the overlap is below `min_overlap` or leaves no degrees of
/// freedom; [`Error::NumericDegeneracy`] when either side has zero variance
/// on the shared dates.
pub fn correlate_pair(
    a: &Series,
    b: &Series,
    min_overlap: usize,
) -> Result<Option<CorrelationResult>> {
    let (left, right) = a.overlap(b);
    let n = left.len();

    if n < min_overlap || n <= 2 {
        return Ok(None);
    }

    let degenerate = || Error::NumericDegeneracy {
        series_a: a.key.to_string(),
        series_b: b.key.to_string(),
    };

    let r = stats::pearson(&left, &right).ok_or_else(degenerate)?;
    let p_value = stats::correlation_p_value(r, n).ok_or_else(degenerate)?;

    Ok(Some(CorrelationResult {
        series_a: a.key.clone(),
        series_b: b.key.clone(),
        r,
        p_value: p_value.clamp(0.0, 1.0),
        n_overlap: n,
    }))
}

/// Correlate every unordered pair `i < j`; a series is never paired with itself.
pub fn correlate_all(series: &[Series], min_overlap: usize) -> CorrelationReport {
    let mut report = CorrelationReport::default();

    for (i, a) in series.iter().enumerate() {
        for b in &series[i + 1..] {
            match correlate_pair(a, b, min_overlap) {
                Ok(Some(result)) => {
                    report.pairs_evaluated += 1;
                    report.results.push(result);
                }
                Ok(None) => report.pairs_insufficient_overlap += 1,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping degenerate pair");
                    report.pairs_degenerate += 1;
                }
            }
        }
    }

    report
}
