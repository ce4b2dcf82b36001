//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: users, logs, insights
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id               TEXT PRIMARY KEY,
        name             TEXT,
        email            TEXT,
        created_at       DATETIME NOT NULL
    );

    -- Raw log rows, either a single metric/value pair or a JSON bag of
    -- metrics. The date is kept exactly as entered.
    CREATE TABLE IF NOT EXISTS log_entries (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          TEXT NOT NULL REFERENCES users(id),
        date             TEXT NOT NULL,
        domain           TEXT NOT NULL,
        metric           TEXT,
        value            REAL,
        metrics          JSON,
        notes            TEXT,
        source_path      TEXT,
        created_at       DATETIME NOT NULL,

        CHECK (metric IS NOT NULL OR metrics IS NOT NULL)
    );

    CREATE INDEX IF NOT EXISTS idx_log_entries_user ON log_entries(user_id, date);

    -- Derived: fully replaced on every successful analysis run
    CREATE TABLE IF NOT EXISTS correlation_insights (
        id                TEXT PRIMARY KEY,
        user_id           TEXT NOT NULL REFERENCES users(id),
        series_a          TEXT NOT NULL,
        series_b          TEXT NOT NULL,
        description       TEXT NOT NULL,
        correlation_score REAL NOT NULL,
        p_value           REAL NOT NULL,
        n_overlap         INTEGER NOT NULL,
        rank_bucket       TEXT NOT NULL CHECK (rank_bucket IN ('positive', 'negative')),
        rank              INTEGER NOT NULL,
        strength          TEXT NOT NULL,
        direction         TEXT NOT NULL,
        created_at        DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_correlation_insights_user ON correlation_insights(user_id);
    "#,
    // Version 2: run history and import bookkeeping
    r#"
    CREATE TABLE IF NOT EXISTS analysis_runs (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id           TEXT NOT NULL,
        as_of             TEXT NOT NULL,
        started_at        DATETIME NOT NULL,
        duration_ms       INTEGER NOT NULL,
        state             TEXT NOT NULL,
        failed_at         TEXT,
        error_message     TEXT,
        persisted         INTEGER NOT NULL,
        records_fetched   INTEGER NOT NULL,
        invalid_records   INTEGER NOT NULL,
        series_considered INTEGER NOT NULL,
        pairs_evaluated   INTEGER NOT NULL,
        pairs_significant INTEGER NOT NULL,
        positive_stored   INTEGER NOT NULL,
        negative_stored   INTEGER NOT NULL,
        details           JSON
    );

    CREATE INDEX IF NOT EXISTS idx_analysis_runs_user ON analysis_runs(user_id, started_at);

    CREATE TABLE IF NOT EXISTS imports (
        path              TEXT PRIMARY KEY,
        sha256            TEXT NOT NULL,
        rows_imported     INTEGER NOT NULL,
        imported_at       DATETIME NOT NULL
    );
    "#,
    // Version 3: imports keyed by path and user override; log rows remember
    // which import produced them so a changed file replaces its old rows
    r#"
    ALTER TABLE log_entries ADD COLUMN import_user TEXT NOT NULL DEFAULT '';

    CREATE INDEX IF NOT EXISTS idx_log_entries_source ON log_entries(source_path, import_user);

    CREATE TABLE imports_v3 (
        path              TEXT NOT NULL,
        user_override     TEXT NOT NULL DEFAULT '',
        sha256            TEXT NOT NULL,
        rows_imported     INTEGER NOT NULL,
        imported_at       DATETIME NOT NULL,

        PRIMARY KEY (path, user_override)
    );

    INSERT INTO imports_v3 (path, user_override, sha256, rows_imported, imported_at)
    SELECT path, '', sha256, rows_imported, imported_at FROM imports;

    DROP TABLE imports;
    ALTER TABLE imports_v3 RENAME TO imports;

    CREATE INDEX IF NOT EXISTS idx_imports_sha256 ON imports(sha256, user_override);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
