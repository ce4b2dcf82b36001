//! Database repository layer
//!
//! Provides query and insert operations for users, log rows, insights,
//! analysis runs and import bookkeeping.

use crate::analysis::{InsightSink, LogSource, RunState, RunSummary};
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// A recorded analysis run, as read back from `analysis_runs`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisRunRecord {
    pub id: i64,
    pub user_id: String,
    pub as_of: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub state: RunState,
    pub failed_at: Option<RunState>,
    pub error_message: Option<String>,
    pub persisted: bool,
    pub records_fetched: usize,
    pub invalid_records: usize,
    pub series_considered: usize,
    pub pairs_evaluated: usize,
    pub pairs_significant: usize,
    pub positive_stored: usize,
    pub negative_stored: usize,
}

/// A previously imported file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub path: String,
    /// User every row was attributed to, if the import overrode it
    pub user_override: Option<String>,
    pub sha256: String,
    pub rows_imported: usize,
    pub imported_at: DateTime<Utc>,
}

/// Database handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Multi-statement writes run in transactions, so a poisoned guard
        // never exposes a partial write.
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // User operations
    // ============================================

    /// Insert or update a user
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO users (id, name, email, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(excluded.name, users.name),
                email = COALESCE(excluded.email, users.email)
            "#,
            params![
                user.id,
                user.name,
                user.email,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM users WHERE id = ?", [id], Self::row_to_user)
            .optional()
            .map_err(Error::from)
    }

    /// List all users, ordered by ID
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let created_at_str: String = row.get("created_at")?;
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            created_at: parse_timestamp(&created_at_str),
        })
    }

    // ============================================
    // Log operations
    // ============================================

    /// Insert log rows in a transaction, creating any users they reference.
    ///
    /// Returns the number of rows inserted.
    pub fn insert_log_rows(&self, rows: &[RawLogRow], source_path: Option<&str>) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        insert_rows(&tx, rows, source_path, "")?;
        tx.commit()?;
        Ok(rows.len())
    }

    /// Load one file's rows, replacing the rows an earlier version of the
    /// same file contributed under the same user override.
    ///
    /// Deleting the old rows, inserting the new ones and recording the
    /// import commit together. Returns `(rows_removed, rows_inserted)`.
    pub fn import_log_file(
        &self,
        path: &str,
        user_override: Option<&str>,
        sha256: &str,
        rows: &[RawLogRow],
    ) -> Result<(usize, usize)> {
        let import_user = user_override.unwrap_or_default();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM log_entries WHERE source_path = ?1 AND import_user = ?2",
            params![path, import_user],
        )?;
        insert_rows(&tx, rows, Some(path), import_user)?;
        tx.execute(
            r#"
            INSERT INTO imports (path, user_override, sha256, rows_imported, imported_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(path, user_override) DO UPDATE SET
                sha256 = excluded.sha256,
                rows_imported = excluded.rows_imported,
                imported_at = excluded.imported_at
            "#,
            params![
                path,
                import_user,
                sha256,
                rows.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;

        tx.commit()?;
        Ok((removed, rows.len()))
    }

    /// All log rows for a user, in insertion order
    pub fn get_log_rows(&self, user_id: &str) -> Result<Vec<RawLogRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, date, domain, metric, value, metrics, notes
            FROM log_entries
            WHERE user_id = ?
            ORDER BY id ASC
            "#,
        )?;

        let rows = stmt
            .query_map([user_id], Self::row_to_log)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Count log rows, optionally for a single user
    pub fn count_log_rows(&self, user_id: Option<&str>) -> Result<i64> {
        let conn = self.lock();
        let count: i64 = match user_id {
            Some(user_id) => conn.query_row(
                "SELECT COUNT(*) FROM log_entries WHERE user_id = ?",
                [user_id],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM log_entries", [], |r| r.get(0))?,
        };
        Ok(count)
    }

    fn row_to_log(row: &Row) -> rusqlite::Result<RawLogRow> {
        let metric: Option<String> = row.get("metric")?;
        let value: Option<f64> = row.get("value")?;
        let metrics_str: Option<String> = row.get("metrics")?;

        let payload = match metric {
            Some(metric) => LogPayload::Scalar { metric, value },
            None => {
                let metrics = match metrics_str {
                    Some(s) => serde_json::from_str(&s).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            METRICS_COLUMN,
                            Type::Text,
                            Box::new(e),
                        )
                    })?,
                    None => serde_json::Map::new(),
                };
                LogPayload::Bag { metrics, value }
            }
        };

        Ok(RawLogRow {
            user_id: row.get("user_id")?,
            date: row.get("date")?,
            domain: row.get("domain")?,
            payload,
            notes: row.get("notes")?,
        })
    }

    // ============================================
    // Insight operations
    // ============================================

    /// Replace every stored insight for a user in one transaction.
    ///
    /// Ranks are assigned per bucket in the order given. If any insert
    /// fails, the transaction rolls back and the previous set is untouched.
    pub fn replace_user_insights(&self, user_id: &str, insights: &[Insight]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let removed = tx.execute(
            "DELETE FROM correlation_insights WHERE user_id = ?",
            [user_id],
        )?;

        let mut positive_rank = 0u32;
        let mut negative_rank = 0u32;
        for insight in insights {
            let rank = match insight.rank_bucket {
                RankBucket::Positive => {
                    positive_rank += 1;
                    positive_rank
                }
                RankBucket::Negative => {
                    negative_rank += 1;
                    negative_rank
                }
            };

            tx.execute(
                r#"
                INSERT INTO correlation_insights (id, user_id, series_a, series_b, description,
                                                  correlation_score, p_value, n_overlap,
                                                  rank_bucket, rank, strength, direction, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    uuid::Uuid::new_v4().to_string(),
                    user_id,
                    insight.series_a.as_str(),
                    insight.series_b.as_str(),
                    insight.description,
                    insight.correlation_score,
                    insight.p_value,
                    insight.n_overlap as i64,
                    insight.rank_bucket.as_str(),
                    rank,
                    insight.strength.as_str(),
                    insight.direction.as_str(),
                    now,
                ],
            )?;
        }

        tx.commit()?;

        tracing::debug!(
            user_id,
            removed,
            inserted = insights.len(),
            "Replaced correlation insights"
        );

        Ok(insights.len())
    }

    /// Stored insights for a user: positives first, each bucket by rank
    pub fn get_insights(&self, user_id: &str) -> Result<Vec<StoredInsight>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM correlation_insights
            WHERE user_id = ?
            ORDER BY CASE rank_bucket WHEN 'positive' THEN 0 ELSE 1 END, rank ASC
            "#,
        )?;

        let insights = stmt
            .query_map([user_id], Self::row_to_insight)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(insights)
    }

    fn row_to_insight(row: &Row) -> rusqlite::Result<StoredInsight> {
        let created_at_str: String = row.get("created_at")?;
        let bucket_str: String = row.get("rank_bucket")?;
        let strength_str: String = row.get("strength")?;
        let r: f64 = row.get("correlation_score")?;

        Ok(StoredInsight {
            id: row.get("id")?,
            rank: row.get("rank")?,
            created_at: parse_timestamp(&created_at_str),
            insight: Insight {
                user_id: row.get("user_id")?,
                series_a: SeriesKey::from_raw(row.get::<_, String>("series_a")?),
                series_b: SeriesKey::from_raw(row.get::<_, String>("series_b")?),
                description: row.get("description")?,
                correlation_score: r,
                p_value: row.get("p_value")?,
                n_overlap: row.get::<_, i64>("n_overlap")? as usize,
                rank_bucket: bucket_str.parse().unwrap_or(if r < 0.0 {
                    RankBucket::Negative
                } else {
                    RankBucket::Positive
                }),
                strength: strength_str.parse().unwrap_or_else(|_| Strength::from_r(r)),
                direction: Direction::from_r(r),
            },
        })
    }

    // ============================================
    // Analysis run operations
    // ============================================

    /// Insert an analysis run record for observability.
    ///
    /// Returns the ID of the inserted record.
    pub fn insert_analysis_run(&self, run: &RunSummary) -> Result<i64> {
        let details = serde_json::json!({
            "observations": run.analysis.observations,
            "observations_outside_window": run.analysis.observations_outside_window,
            "series_dropped": run.analysis.series_dropped,
            "pairs_insufficient_overlap": run.analysis.pairs_insufficient_overlap,
            "pairs_degenerate": run.analysis.pairs_degenerate,
        });

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO analysis_runs (user_id, as_of, started_at, duration_ms, state, failed_at,
                                       error_message, persisted, records_fetched, invalid_records,
                                       series_considered, pairs_evaluated, pairs_significant,
                                       positive_stored, negative_stored, details)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                run.user_id,
                run.as_of.to_string(),
                run.started_at.to_rfc3339(),
                run.duration_ms,
                run.state.as_str(),
                run.failed_at.map(|s| s.as_str()),
                run.error_message,
                run.persisted,
                run.analysis.records_fetched as i64,
                run.analysis.invalid_records as i64,
                run.analysis.series_considered as i64,
                run.analysis.pairs_evaluated as i64,
                run.analysis.pairs_significant as i64,
                run.positive_stored as i64,
                run.negative_stored as i64,
                details.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get recent analysis runs, newest first, optionally for one user.
    pub fn get_analysis_runs(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisRunRecord>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM analysis_runs
            WHERE ?1 IS NULL OR user_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let runs = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let started_at_str: String = row.get("started_at")?;
                let state_str: String = row.get("state")?;
                let failed_at_str: Option<String> = row.get("failed_at")?;
                Ok(AnalysisRunRecord {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    as_of: row.get("as_of")?,
                    started_at: parse_timestamp(&started_at_str),
                    duration_ms: row.get("duration_ms")?,
                    state: RunState::from_storage(&state_str),
                    failed_at: failed_at_str.as_deref().map(RunState::from_storage),
                    error_message: row.get("error_message")?,
                    persisted: row.get("persisted")?,
                    records_fetched: row.get::<_, i64>("records_fetched")? as usize,
                    invalid_records: row.get::<_, i64>("invalid_records")? as usize,
                    series_considered: row.get::<_, i64>("series_considered")? as usize,
                    pairs_evaluated: row.get::<_, i64>("pairs_evaluated")? as usize,
                    pairs_significant: row.get::<_, i64>("pairs_significant")? as usize,
                    positive_stored: row.get::<_, i64>("positive_stored")? as usize,
                    negative_stored: row.get::<_, i64>("negative_stored")? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    // ============================================
    // Import bookkeeping
    // ============================================

    /// Get the import record for a file path and user override
    pub fn get_import(
        &self,
        path: &str,
        user_override: Option<&str>,
    ) -> Result<Option<ImportRecord>> {
        let conn = self.lock();
        conn.query_row(
            r#"
            SELECT path, user_override, sha256, rows_imported, imported_at
            FROM imports
            WHERE path = ?1 AND user_override = ?2
            "#,
            params![path, user_override.unwrap_or_default()],
            Self::row_to_import,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Find an earlier import of the same content under the same user override
    pub fn find_import_by_hash(
        &self,
        sha256: &str,
        user_override: Option<&str>,
    ) -> Result<Option<ImportRecord>> {
        let conn = self.lock();
        conn.query_row(
            r#"
            SELECT path, user_override, sha256, rows_imported, imported_at
            FROM imports
            WHERE sha256 = ?1 AND user_override = ?2
            ORDER BY imported_at ASC
            LIMIT 1
            "#,
            params![sha256, user_override.unwrap_or_default()],
            Self::row_to_import,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_import(row: &Row) -> rusqlite::Result<ImportRecord> {
        let user_override: String = row.get(1)?;
        let imported_at_str: String = row.get(4)?;
        Ok(ImportRecord {
            path: row.get(0)?,
            user_override: Some(user_override).filter(|u| !u.is_empty()),
            sha256: row.get(2)?,
            rows_imported: row.get::<_, i64>(3)? as usize,
            imported_at: parse_timestamp(&imported_at_str),
        })
    }
}

/// Position of `metrics` in the log row SELECT.
const METRICS_COLUMN: usize = 5;

/// Insert rows inside an open transaction, creating referenced users.
fn insert_rows(
    conn: &Connection,
    rows: &[RawLogRow],
    source_path: Option<&str>,
    import_user: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    for row in rows {
        conn.execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            params![row.user_id, now],
        )?;

        let (metric, value, metrics) = match &row.payload {
            LogPayload::Scalar { metric, value } => (Some(metric.as_str()), *value, None),
            LogPayload::Bag { metrics, value } => (
                None,
                *value,
                Some(serde_json::Value::Object(metrics.clone()).to_string()),
            ),
        };

        conn.execute(
            r#"
            INSERT INTO log_entries (user_id, date, domain, metric, value, metrics, notes,
                                     source_path, import_user, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                row.user_id,
                row.date,
                row.domain,
                metric,
                value.filter(|v| v.is_finite()),
                metrics,
                row.notes,
                source_path,
                import_user,
                now,
            ],
        )?;
    }

    Ok(())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl LogSource for Database {
    fn fetch_logs(&self, user_id: &str) -> Result<Vec<RawLogRow>> {
        self.get_log_rows(user_id)
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM users UNION SELECT DISTINCT user_id FROM log_entries ORDER BY 1",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl InsightSink for Database {
    fn replace_insights(&self, user_id: &str, insights: &[Insight]) -> Result<()> {
        self.replace_user_insights(user_id, insights)
            .map(|_| ())
            .map_err(|e| Error::Persistence(e.to_string()))
    }

    fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.insert_analysis_run(summary).map(|_| ())
    }
}
