//! Series builder: observations grouped into per-key daily series.

use crate::types::{Observation, SeriesKey};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One metric's values, one per calendar date, in date order.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub key: SeriesKey,
    pub points: BTreeMap<NaiveDate, f64>,
}

impl Series {
    /// Number of distinct dates.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Paired values on the dates both series share, in date order.
    pub fn overlap(&self, other: &Series) -> (Vec<f64>, Vec<f64>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for (date, value) in &self.points {
            if let Some(other_value) = other.points.get(date) {
                left.push(*value);
                right.push(*other_value);
            }
        }
        (left, right)
    }
}

/// Output of [`build_series`].
#[derive(Debug, Default)]
pub struct SeriesSet {
    /// Series that met the density threshold, ordered by key
    pub series: Vec<Series>,
    /// Series excluded for having too few distinct dates
    pub dropped: Vec<SeriesKey>,
}

/// Group observations by key, average same-day duplicates, and drop series
/// with fewer than `min_points` distinct dates.
///
/// Result order is lexicographic by key regardless of input order.
pub fn build_series(observations: &[Observation], min_points: usize) -> SeriesSet {
    let mut grouped: BTreeMap<&SeriesKey, BTreeMap<NaiveDate, Vec<f64>>> = BTreeMap::new();

    for obs in observations {
        grouped
            .entry(&obs.series_key)
            .or_default()
            .entry(obs.date)
            .or_default()
            .push(obs.value);
    }

    let mut set = SeriesSet::default();
    for (key, days) in grouped {
        if days.len() < min_points {
            tracing::debug!(
                series = %key,
                points = days.len(),
                min_points,
                "Dropping sparse series"
            );
            set.dropped.push(key.clone());
            continue;
        }

        let points = days
            .into_iter()
            .map(|(date, values)| (date, daily_mean(values)))
            .collect();

        set.series.push(Series {
            key: key.clone(),
            points,
        });
    }

    set
}

/// Mean of one day's values, summed in sorted order so that input order
/// cannot change the result.
fn daily_mean(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    values.iter().sum::<f64>() / values.len() as f64
}
