//! Core domain types for crosscoach
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Domain** | A life area a metric belongs to (sleep, climbing, mood, coding, ...) |
//! | **Metric** | A named quantity within a domain (hours, grade, score) |
//! | **Series key** | `domain_metric`, the stable identifier of one time series |
//! | **Observation** | One numeric value for one series on one calendar date |
//! | **Insight** | A persisted sentence describing one significant correlation |
//!
//! Log rows arrive in two shapes (a single `metric`/`value` pair, or a JSON
//! bag of metrics). That variance is captured by [`LogPayload`] and never
//! leaks past the ingestion adapter: everything downstream only sees
//! [`Observation`]s.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================
// Users
// ============================================

/// A person whose logs are analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Raw log rows (input)
// ============================================

/// A log row as stored or imported, before normalization.
///
/// `date` is kept as the raw string so that malformed dates reach the
/// ingestion adapter, which skips and counts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLogRow {
    #[serde(default)]
    pub user_id: String,
    pub date: String,
    pub domain: String,
    #[serde(flatten)]
    pub payload: LogPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RawLogRow {
    /// Build a scalar row (`domain`, `metric`, `value`).
    pub fn scalar(
        user_id: &str,
        date: &str,
        domain: &str,
        metric: &str,
        value: Option<f64>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: date.to_string(),
            domain: domain.to_string(),
            payload: LogPayload::Scalar {
                metric: metric.to_string(),
                value,
            },
            notes: None,
        }
    }

    /// Build a bag row carrying a JSON object of `{name: value}` metrics.
    pub fn bag(
        user_id: &str,
        date: &str,
        domain: &str,
        metrics: serde_json::Map<String, serde_json::Value>,
        value: Option<f64>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: date.to_string(),
            domain: domain.to_string(),
            payload: LogPayload::Bag { metrics, value },
            notes: None,
        }
    }
}

/// The two shapes a log row's measurements can take.
///
/// Deserialized untagged: a row with a `metrics` object is a bag, a row with
/// a `metric` name is a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogPayload {
    /// Bag of metrics; a populated `value` adds a series keyed by domain alone.
    Bag {
        metrics: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        value: Option<f64>,
    },
    /// One metric with one value.
    Scalar {
        metric: String,
        #[serde(default)]
        value: Option<f64>,
    },
}

// ============================================
// Series keys and observations
// ============================================

/// Identifier of one metric time series: `domain` or `domain_metric`.
///
/// Ordering is lexicographic on the underlying string, which is the order
/// series are enumerated in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Key for a domain-level series (bag rows with a populated `value`).
    pub fn domain(domain: &str) -> Self {
        Self(domain.trim().to_lowercase())
    }

    /// Key for a metric within a domain.
    pub fn metric(domain: &str, metric: &str) -> Self {
        Self(format!(
            "{}_{}",
            domain.trim().to_lowercase(),
            metric.trim().to_lowercase().replace(' ', "_")
        ))
    }

    /// Wrap an already-formed key.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain part (everything before the first underscore).
    pub fn domain_part(&self) -> &str {
        self.0.split_once('_').map_or(self.0.as_str(), |(d, _)| d)
    }

    /// Metric part (everything after the first underscore), if any.
    pub fn metric_part(&self) -> Option<&str> {
        self.0.split_once('_').map(|(_, m)| m)
    }

    /// Human-readable name: "sleep_time_in_bed" -> "Sleep time in bed".
    pub fn readable(&self) -> String {
        let words = match self.metric_part() {
            Some(metric) => format!("{} {}", self.domain_part(), metric.replace('_', " ")),
            None => self.domain_part().to_string(),
        };
        capitalize_first(words.trim())
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One normalized numeric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub series_key: SeriesKey,
    pub value: f64,
}

// ============================================
// Insights (output)
// ============================================

/// Which sign bucket an insight was selected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankBucket {
    Positive,
    Negative,
}

impl RankBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankBucket::Positive => "positive",
            RankBucket::Negative => "negative",
        }
    }
}

impl std::str::FromStr for RankBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(RankBucket::Positive),
            "negative" => Ok(RankBucket::Negative),
            _ => Err(format!("unknown rank bucket: {}", s)),
        }
    }
}

/// Human-readable strength band of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    /// Band for a coefficient: strong above 0.7, moderate above 0.5.
    pub fn from_r(r: f64) -> Self {
        let magnitude = r.abs();
        if magnitude > 0.7 {
            Strength::Strong
        } else if magnitude > 0.5 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Weak => "weak",
            Strength::Moderate => "moderate",
            Strength::Strong => "strong",
        }
    }
}

impl std::str::FromStr for Strength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weak" => Ok(Strength::Weak),
            "moderate" => Ok(Strength::Moderate),
            "strong" => Ok(Strength::Strong),
            _ => Err(format!("unknown strength: {}", s)),
        }
    }
}

/// Direction of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn from_r(r: f64) -> Self {
        if r < 0.0 {
            Direction::Negative
        } else {
            Direction::Positive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        }
    }
}

/// A rendered insight, ready to be persisted.
///
/// Contains no ids or timestamps: those are assigned by the store, so the
/// same input always produces an identical list of insights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub user_id: String,
    pub series_a: SeriesKey,
    pub series_b: SeriesKey,
    pub description: String,
    /// Pearson r of the underlying correlation
    pub correlation_score: f64,
    pub p_value: f64,
    pub n_overlap: usize,
    pub rank_bucket: RankBucket,
    pub strength: Strength,
    pub direction: Direction,
}

/// An insight as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredInsight {
    pub id: String,
    /// Position within its bucket, starting at 1
    pub rank: u32,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub insight: Insight,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_series_key_readable() {
        assert_eq!(
            SeriesKey::metric("sleep", "hours").readable(),
            "Sleep hours"
        );
        assert_eq!(
            SeriesKey::from_raw("sleep_time_in_bed").readable(),
            "Sleep time in bed"
        );
        assert_eq!(SeriesKey::domain("mood").readable(), "Mood");
    }

    #[test]
    fn test_series_key_parts() {
        let key = SeriesKey::metric("Climbing", "max grade");
        assert_eq!(key.as_str(), "climbing_max_grade");
        assert_eq!(key.domain_part(), "climbing");
        assert_eq!(key.metric_part(), Some("max_grade"));
        assert_eq!(SeriesKey::domain("mood").metric_part(), None);
    }

    #[test]
    fn test_strength_bands() {
        assert_eq!(Strength::from_r(0.95), Strength::Strong);
        assert_eq!(Strength::from_r(-0.71), Strength::Strong);
        assert_eq!(Strength::from_r(0.7), Strength::Moderate);
        assert_eq!(Strength::from_r(-0.55), Strength::Moderate);
        assert_eq!(Strength::from_r(0.5), Strength::Weak);
        assert_eq!(Strength::from_r(0.31), Strength::Weak);
    }

    #[test]
    fn test_deserialize_scalar_row() {
        let row: RawLogRow = serde_json::from_value(json!({
            "user_id": "u1",
            "date": "2025-03-01",
            "domain": "sleep",
            "metric": "hours",
            "value": 7.5,
        }))
        .unwrap();

        assert_eq!(
            row.payload,
            LogPayload::Scalar {
                metric: "hours".to_string(),
                value: Some(7.5)
            }
        );
    }

    #[test]
    fn test_deserialize_bag_row() {
        let row: RawLogRow = serde_json::from_value(json!({
            "user_id": "u1",
            "date": "2025-03-01",
            "domain": "mood",
            "metrics": {"energy": 4, "stress": 2.5},
            "value": 3,
            "notes": "long day",
        }))
        .unwrap();

        match row.payload {
            LogPayload::Bag { metrics, value } => {
                assert_eq!(metrics.len(), 2);
                assert_eq!(value, Some(3.0));
            }
            other => panic!("expected bag payload, got {:?}", other),
        }
        assert_eq!(row.notes.as_deref(), Some("long day"));
    }

    #[test]
    fn test_deserialize_null_value() {
        let row: RawLogRow = serde_json::from_value(json!({
            "user_id": "u1",
            "date": "2025-03-01",
            "domain": "journaling",
            "metric": "entry",
            "value": null,
        }))
        .unwrap();

        assert_eq!(
            row.payload,
            LogPayload::Scalar {
                metric: "entry".to_string(),
                value: None
            }
        );
    }
}
