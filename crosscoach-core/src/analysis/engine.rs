//! Correlation run orchestration
//!
//! One run analyzes one user's logs end to end:
//!
//! ```text
//! FETCHING → BUILDING → CORRELATING → SELECTING → RENDERING → PERSISTING → DONE
//!     │          │                                                │
//!     └──────────┴──────────────────► FAILED ◄────────────────────┘
//! ```
//!
//! A run fails only when the log source cannot be read, when every fetched
//! row is malformed, or when the insight sink rejects the replacement. No
//! logs at all, or no series dense enough to pair, is a successful run that
//! replaces the user's insights with an empty set.
//!
//! Every run produces a [`RunSummary`]; failures are reported through it
//! rather than as `Err`, so batch callers can keep going.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crosscoach_core::analysis::CorrelationEngine;
//!
//! let engine = CorrelationEngine::new(config.analysis.clone());
//! let summary = engine.run(&db, &db, "user-1");
//! println!("{}: {} insights", summary.user_id, summary.insights.len());
//! ```

use super::correlation::correlate_all;
use super::render::render;
use super::selector::{is_notable, select};
use super::series::build_series;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::ingest::normalize_rows;
use crate::types::{Insight, RankBucket, RawLogRow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::time::Instant;

// ============================================
// Collaborator contracts
// ============================================

/// Where a user's raw log rows come from.
pub trait LogSource {
    /// All log rows for a user, in no particular order.
    fn fetch_logs(&self, user_id: &str) -> Result<Vec<RawLogRow>>;

    /// Every user known to the source.
    fn user_ids(&self) -> Result<Vec<String>>;
}

/// Where rendered insights go.
pub trait InsightSink {
    /// Atomically replace all of a user's insights.
    ///
    /// Either every insight is stored and the previous set is gone, or the
    /// previous set is left exactly as it was.
    fn replace_insights(&self, user_id: &str, insights: &[Insight]) -> Result<()>;

    /// Record a finished run. Sinks without run history ignore it.
    fn record_run(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

// ============================================
// Run state and summary
// ============================================

/// Step of a correlation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Fetching,
    Building,
    Correlating,
    Selecting,
    Rendering,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    /// Convert to string for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Fetching => "fetching",
            RunState::Building => "building",
            RunState::Correlating => "correlating",
            RunState::Selecting => "selecting",
            RunState::Rendering => "rendering",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    /// Parse state string from storage.
    pub fn from_storage(value: &str) -> Self {
        match value {
            "fetching" => RunState::Fetching,
            "building" => RunState::Building,
            "correlating" => RunState::Correlating,
            "selecting" => RunState::Selecting,
            "rendering" => RunState::Rendering,
            "persisting" => RunState::Persisting,
            "done" => RunState::Done,
            _ => RunState::Failed,
        }
    }
}

/// Counts and output of the pure part of a run (building through rendering).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub records_fetched: usize,
    pub invalid_records: usize,
    pub observations: usize,
    /// Observations dropped by the lookback window
    pub observations_outside_window: usize,
    /// Series dense enough to be paired
    pub series_considered: usize,
    /// Series dropped as too sparse
    pub series_dropped: usize,
    pub pairs_evaluated: usize,
    pub pairs_insufficient_overlap: usize,
    pub pairs_degenerate: usize,
    /// Pairs passing both filters, before top-K truncation
    pub pairs_significant: usize,
    pub insights: Vec<Insight>,
}

impl Analysis {
    /// Number of insights in a bucket.
    pub fn count_in(&self, bucket: RankBucket) -> usize {
        self.insights
            .iter()
            .filter(|i| i.rank_bucket == bucket)
            .count()
    }
}

/// Outcome of one correlation run.
///
/// Recorded in the `analysis_runs` table for observability.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub user_id: String,
    /// `Done` or `Failed`
    pub state: RunState,
    /// Step that was executing when the run failed
    pub failed_at: Option<RunState>,
    pub error_message: Option<String>,
    /// Date the lookback window is measured from
    pub as_of: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// False for previews, which never touch the sink
    pub persisted: bool,
    pub positive_stored: usize,
    pub negative_stored: usize,
    #[serde(flatten)]
    pub analysis: Analysis,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    /// Rendered insights (empty when the run failed before rendering).
    pub fn insights(&self) -> &[Insight] {
        &self.analysis.insights
    }
}

// ============================================
// Engine
// ============================================

/// Runs the correlation pipeline with one set of thresholds.
///
/// Holds no per-user state; a single engine can serve any number of runs.
/// The caller is responsible for not running the same user concurrently.
#[derive(Debug, Clone)]
pub struct CorrelationEngine {
    config: AnalysisConfig,
}

impl CorrelationEngine {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze a user's logs as of today and replace their stored insights.
    pub fn run(
        &self,
        source: &dyn LogSource,
        sink: &dyn InsightSink,
        user_id: &str,
    ) -> RunSummary {
        self.run_as_of(source, sink, user_id, Utc::now().date_naive())
    }

    /// Analyze a user's logs as of `as_of` and replace their stored insights.
    pub fn run_as_of(
        &self,
        source: &dyn LogSource,
        sink: &dyn InsightSink,
        user_id: &str,
        as_of: NaiveDate,
    ) -> RunSummary {
        self.execute(source, Some(sink), user_id, as_of)
    }

    /// Compute a user's insights without persisting or recording anything.
    pub fn preview_as_of(
        &self,
        source: &dyn LogSource,
        user_id: &str,
        as_of: NaiveDate,
    ) -> RunSummary {
        self.execute(source, None, user_id, as_of)
    }

    /// Run every user known to the source.
    ///
    /// A failed run is logged and does not stop the remaining users. Only a
    /// failure to list users is returned as an error.
    pub fn run_all_users(
        &self,
        source: &dyn LogSource,
        sink: &dyn InsightSink,
    ) -> Result<Vec<RunSummary>> {
        let user_ids = source
            .user_ids()
            .map_err(|e| Error::Fetch(format!("failed to list users: {}", e)))?;
        let as_of = Utc::now().date_naive();

        tracing::info!(users = user_ids.len(), "Running correlation analysis for all users");

        let summaries: Vec<RunSummary> = user_ids
            .iter()
            .map(|user_id| self.run_as_of(source, sink, user_id, as_of))
            .collect();

        let failed = summaries.iter().filter(|s| !s.is_success()).count();
        tracing::info!(
            users = summaries.len(),
            failed,
            "Correlation analysis finished for all users"
        );

        Ok(summaries)
    }

    /// Pure pipeline from raw rows to rendered insights.
    ///
    /// Errors only with [`Error::MalformedInput`] when rows were supplied but
    /// none of them could be normalized.
    pub fn analyze_rows(
        &self,
        user_id: &str,
        rows: &[RawLogRow],
        as_of: NaiveDate,
    ) -> Result<Analysis> {
        self.analyze_rows_tracked(user_id, rows, as_of, &mut RunState::Building)
    }

    fn analyze_rows_tracked(
        &self,
        user_id: &str,
        rows: &[RawLogRow],
        as_of: NaiveDate,
        state: &mut RunState,
    ) -> Result<Analysis> {
        let mut analysis = Analysis {
            records_fetched: rows.len(),
            ..Default::default()
        };

        let mut normalized = normalize_rows(rows);
        analysis.invalid_records = normalized.invalid_count();
        if normalized.all_rows_invalid() {
            return Err(Error::MalformedInput(format!(
                "all {} log rows for user {} are invalid",
                normalized.rows_seen, user_id
            )));
        }

        // A window reaching past the earliest representable date keeps everything
        if let Some(cutoff) = self
            .config
            .lookback_days
            .and_then(|days| as_of.checked_sub_signed(Duration::days(i64::from(days))))
        {
            analysis.observations_outside_window = normalized.retain_since(cutoff);
        }
        analysis.observations = normalized.observations.len();

        let set = build_series(&normalized.observations, self.config.min_points_per_series);
        analysis.series_considered = set.series.len();
        analysis.series_dropped = set.dropped.len();

        transition(state, RunState::Correlating);
        let report = correlate_all(&set.series, self.config.min_overlap);
        analysis.pairs_evaluated = report.pairs_evaluated;
        analysis.pairs_insufficient_overlap = report.pairs_insufficient_overlap;
        analysis.pairs_degenerate = report.pairs_degenerate;

        transition(state, RunState::Selecting);
        analysis.pairs_significant = report
            .results
            .iter()
            .filter(|r| is_notable(r, &self.config))
            .count();
        let selected = select(&report.results, &self.config);

        transition(state, RunState::Rendering);
        analysis.insights = selected.iter().map(|s| render(user_id, s)).collect();

        Ok(analysis)
    }

    fn execute(
        &self,
        source: &dyn LogSource,
        sink: Option<&dyn InsightSink>,
        user_id: &str,
        as_of: NaiveDate,
    ) -> RunSummary {
        let span = tracing::info_span!("correlation_run", user_id = %user_id);
        let _enter = span.enter();

        let started_at = Utc::now();
        let start = Instant::now();
        let mut state = RunState::Fetching;
        tracing::debug!(state = state.as_str(), %as_of, "Run started");

        let outcome = self.execute_steps(source, sink, user_id, as_of, &mut state);

        let mut summary = RunSummary {
            user_id: user_id.to_string(),
            state: RunState::Done,
            failed_at: None,
            error_message: None,
            as_of,
            started_at,
            duration_ms: 0,
            persisted: false,
            positive_stored: 0,
            negative_stored: 0,
            analysis: Analysis::default(),
        };

        match outcome {
            Ok((analysis, persisted)) => {
                if persisted {
                    summary.positive_stored = analysis.count_in(RankBucket::Positive);
                    summary.negative_stored = analysis.count_in(RankBucket::Negative);
                }
                summary.persisted = persisted;
                summary.analysis = analysis;
                transition(&mut state, RunState::Done);
            }
            Err((e, partial)) => {
                summary.state = RunState::Failed;
                summary.failed_at = Some(state);
                summary.error_message = Some(e.to_string());
                summary.analysis = partial;
                transition(&mut state, RunState::Failed);
            }
        }
        summary.duration_ms = start.elapsed().as_millis() as i64;

        if summary.is_success() {
            tracing::info!(
                series = summary.analysis.series_considered,
                pairs_evaluated = summary.analysis.pairs_evaluated,
                pairs_significant = summary.analysis.pairs_significant,
                positive = summary.analysis.count_in(RankBucket::Positive),
                negative = summary.analysis.count_in(RankBucket::Negative),
                persisted = summary.persisted,
                duration_ms = summary.duration_ms,
                "Correlation run completed"
            );
        } else {
            tracing::error!(
                failed_at = summary.failed_at.map(|s| s.as_str()),
                error = summary.error_message.as_deref().unwrap_or_default(),
                duration_ms = summary.duration_ms,
                "Correlation run failed"
            );
        }

        if let Some(sink) = sink {
            if let Err(e) = sink.record_run(&summary) {
                tracing::warn!(error = %e, "Failed to record analysis run");
            }
        }

        summary
    }

    /// Steps from fetching through persisting. On failure, returns whatever
    /// counts were gathered before the failing step.
    fn execute_steps(
        &self,
        source: &dyn LogSource,
        sink: Option<&dyn InsightSink>,
        user_id: &str,
        as_of: NaiveDate,
        state: &mut RunState,
    ) -> std::result::Result<(Analysis, bool), (Error, Analysis)> {
        let rows = source
            .fetch_logs(user_id)
            .map_err(|e| (as_fetch_error(e), Analysis::default()))?;
        tracing::debug!(rows = rows.len(), "Fetched log rows");

        transition(state, RunState::Building);
        let analysis = self
            .analyze_rows_tracked(user_id, &rows, as_of, state)
            .map_err(|e| {
                let partial = Analysis {
                    records_fetched: rows.len(),
                    invalid_records: rows.len(),
                    ..Default::default()
                };
                (e, partial)
            })?;

        let Some(sink) = sink else {
            return Ok((analysis, false));
        };

        transition(state, RunState::Persisting);
        match sink.replace_insights(user_id, &analysis.insights) {
            Ok(()) => Ok((analysis, true)),
            Err(e) => Err((as_persistence_error(e), analysis)),
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::debug!(from = state.as_str(), to = next.as_str(), "Run state transition");
    *state = next;
}

fn as_fetch_error(e: Error) -> Error {
    match e {
        Error::Fetch(_) => e,
        other => Error::Fetch(other.to_string()),
    }
}

fn as_persistence_error(e: Error) -> Error {
    match e {
        Error::Persistence(_) => e,
        other => Error::Persistence(other.to_string()),
    }
}
