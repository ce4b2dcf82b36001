//! Log ingestion adapter
//!
//! Turns raw log rows (either payload shape) into a flat stream of
//! [`Observation`]s, one per numeric value:
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐     ┌────────────────────────┐
//! │  RawLogRow       │ ──► │ normalize_rows() │ ──► │ (date, series_key, v)  │
//! │  Scalar | Bag    │     │                  │     │ Observation stream     │
//! └──────────────────┘     └──────────────────┘     └────────────────────────┘
//!                                   │
//!                                   ▼
//!                          invalid rows: skipped,
//!                          counted, logged
//! ```
//!
//! Rows with a missing or non-numeric value contribute nothing and are not
//! errors. A row whose date cannot be parsed is an
//! [`Error::InvalidRecord`](crate::Error::InvalidRecord): it is skipped and
//! counted, never fatal to the run.
//!
//! The [`import`] submodule loads JSONL exports of raw rows into the store.

pub mod import;

use crate::error::{Error, Result};
use crate::types::{LogPayload, Observation, RawLogRow, SeriesKey};
use chrono::{DateTime, NaiveDate};

/// Result of normalizing one user's rows.
#[derive(Debug, Default)]
pub struct NormalizedLogs {
    /// Numeric observations, in input order
    pub observations: Vec<Observation>,
    /// Number of rows examined
    pub rows_seen: usize,
    /// Rows that produced no observation without being invalid
    pub rows_without_values: usize,
    /// Rows skipped as malformed
    pub invalid: Vec<Error>,
}

impl NormalizedLogs {
    /// Number of rows skipped as malformed.
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    /// True when rows existed but every one of them was malformed.
    pub fn all_rows_invalid(&self) -> bool {
        self.rows_seen > 0 && self.invalid.len() == self.rows_seen
    }

    /// Drop observations dated before `cutoff`, returning how many were dropped.
    pub fn retain_since(&mut self, cutoff: NaiveDate) -> usize {
        let before = self.observations.len();
        self.observations.retain(|obs| obs.date >= cutoff);
        before - self.observations.len()
    }
}

/// Normalize every row, absorbing per-row errors into the result.
pub fn normalize_rows(rows: &[RawLogRow]) -> NormalizedLogs {
    let mut result = NormalizedLogs {
        rows_seen: rows.len(),
        ..Default::default()
    };

    for row in rows {
        match normalize_row(row) {
            Ok(observations) if observations.is_empty() => result.rows_without_values += 1,
            Ok(observations) => result.observations.extend(observations),
            Err(e) => {
                tracing::warn!(user_id = %row.user_id, error = %e, "Skipping invalid log row");
                result.invalid.push(e);
            }
        }
    }

    result
}

/// Normalize a single row into zero or more observations.
pub fn normalize_row(row: &RawLogRow) -> Result<Vec<Observation>> {
    let date = parse_log_date(&row.date).ok_or_else(|| Error::InvalidRecord {
        user_id: row.user_id.clone(),
        message: format!("unparseable date {:?}", row.date),
    })?;

    if row.domain.trim().is_empty() {
        return Err(Error::InvalidRecord {
            user_id: row.user_id.clone(),
            message: "empty domain".to_string(),
        });
    }

    let mut observations = Vec::new();

    match &row.payload {
        LogPayload::Scalar { metric, value } => {
            if metric.trim().is_empty() {
                return Err(Error::InvalidRecord {
                    user_id: row.user_id.clone(),
                    message: format!("empty metric name in domain {:?}", row.domain),
                });
            }
            if let Some(value) = value.filter(|v| v.is_finite()) {
                observations.push(Observation {
                    date,
                    series_key: SeriesKey::metric(&row.domain, metric),
                    value,
                });
            }
        }
        LogPayload::Bag { metrics, value } => {
            for (name, raw) in metrics {
                if name.trim().is_empty() {
                    continue;
                }
                if let Some(value) = raw.as_f64().filter(|v| v.is_finite()) {
                    observations.push(Observation {
                        date,
                        series_key: SeriesKey::metric(&row.domain, name),
                        value,
                    });
                }
            }
            if let Some(value) = value.filter(|v| v.is_finite()) {
                observations.push(Observation {
                    date,
                    series_key: SeriesKey::domain(&row.domain),
                    value,
                });
            }
        }
    }

    Ok(observations)
}

/// Parse a log date: `YYYY-MM-DD`, or the calendar date of an RFC 3339 timestamp.
pub fn parse_log_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_parse_log_date_forms() {
        assert_eq!(parse_log_date("2025-03-01"), Some(date("2025-03-01")));
        assert_eq!(parse_log_date(" 2025-03-01 "), Some(date("2025-03-01")));
        assert_eq!(
            parse_log_date("2025-03-01T23:30:00-05:00"),
            Some(date("2025-03-01"))
        );
        assert_eq!(parse_log_date("03/01/2025"), None);
        assert_eq!(parse_log_date("2025-02-30"), None);
        assert_eq!(parse_log_date(""), None);
    }

    #[test]
    fn test_scalar_row() {
        let row = RawLogRow::scalar("u1", "2025-03-01", "sleep", "hours", Some(7.5));
        let obs = normalize_row(&row).unwrap();

        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].series_key.as_str(), "sleep_hours");
        assert_eq!(obs[0].date, date("2025-03-01"));
        assert_eq!(obs[0].value, 7.5);
    }

    #[test]
    fn test_scalar_row_without_value() {
        let row = RawLogRow::scalar("u1", "2025-03-01", "journaling", "entry", None);
        assert!(normalize_row(&row).unwrap().is_empty());

        let row = RawLogRow::scalar("u1", "2025-03-01", "sleep", "hours", Some(f64::NAN));
        assert!(normalize_row(&row).unwrap().is_empty());
    }

    #[test]
    fn test_bag_row_with_value() {
        let metrics = json!({"energy": 4, "stress": 2.5, "label": "ok", "missing": null})
            .as_object()
            .cloned()
            .unwrap();
        let row = RawLogRow::bag("u1", "2025-03-01", "mood", metrics, Some(3.0));

        let mut keys: Vec<_> = normalize_row(&row)
            .unwrap()
            .into_iter()
            .map(|o| (o.series_key.as_str().to_string(), o.value))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            keys,
            vec![
                ("mood".to_string(), 3.0),
                ("mood_energy".to_string(), 4.0),
                ("mood_stress".to_string(), 2.5),
            ]
        );
    }

    #[test]
    fn test_invalid_date_is_counted_not_fatal() {
        let rows = vec![
            RawLogRow::scalar("u1", "not-a-date", "sleep", "hours", Some(7.0)),
            RawLogRow::scalar("u1", "2025-03-01", "sleep", "hours", Some(7.0)),
            RawLogRow::scalar("u1", "2025-03-02", "journaling", "entry", None),
        ];

        let result = normalize_rows(&rows);

        assert_eq!(result.rows_seen, 3);
        assert_eq!(result.invalid_count(), 1);
        assert_eq!(result.rows_without_values, 1);
        assert_eq!(result.observations.len(), 1);
        assert!(!result.all_rows_invalid());
        assert!(matches!(result.invalid[0], Error::InvalidRecord { .. }));
    }

    #[test]
    fn test_all_rows_invalid() {
        let rows = vec![
            RawLogRow::scalar("u1", "yesterday", "sleep", "hours", Some(7.0)),
            RawLogRow::scalar("u1", "2025-03-01", "", "hours", Some(7.0)),
        ];
        let result = normalize_rows(&rows);
        assert!(result.all_rows_invalid());
        assert!(result.observations.is_empty());

        assert!(!normalize_rows(&[]).all_rows_invalid());
    }

    #[test]
    fn test_retain_since() {
        let rows = vec![
            RawLogRow::scalar("u1", "2025-01-01", "sleep", "hours", Some(7.0)),
            RawLogRow::scalar("u1", "2025-03-01", "sleep", "hours", Some(8.0)),
        ];
        let mut result = normalize_rows(&rows);

        let dropped = result.retain_since(date("2025-02-01"));

        assert_eq!(dropped, 1);
        assert_eq!(result.observations.len(), 1);
        assert_eq!(result.observations[0].value, 8.0);
    }
}
