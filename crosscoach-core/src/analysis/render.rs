//! Insight text rendering.

use super::correlation::CorrelationResult;
use super::selector::Selected;
use crate::types::{Direction, Insight, SeriesKey, Strength};

/// Sentence describing a correlation between two series.
///
/// Pure in `(series_a, series_b, r)`.
pub fn describe(series_a: &SeriesKey, series_b: &SeriesKey, r: f64) -> String {
    let strength = Strength::from_r(r);
    let direction = Direction::from_r(r);
    let pct = format!("{:.1}", r.abs() * 100.0);
    let relationship = match direction {
        Direction::Positive => "relationship",
        Direction::Negative => "inverse relationship",
    };

    format!(
        "{} and {} show a {} {} correlation ({}% {})",
        series_a.readable(),
        series_b.readable(),
        strength.as_str(),
        direction.as_str(),
        pct,
        relationship
    )
}

/// Render a selected correlation into an [`Insight`] for `user_id`.
pub fn render(user_id: &str, selected: &Selected) -> Insight {
    let CorrelationResult {
        series_a,
        series_b,
        r,
        p_value,
        n_overlap,
    } = &selected.result;

    Insight {
        user_id: user_id.to_string(),
        series_a: series_a.clone(),
        series_b: series_b.clone(),
        description: describe(series_a, series_b, *r),
        correlation_score: *r,
        p_value: *p_value,
        n_overlap: *n_overlap,
        rank_bucket: selected.bucket,
        strength: Strength::from_r(*r),
        direction: Direction::from_r(*r),
    }
}
