//! JSONL log import
//!
//! Loads exported log rows (one JSON object per line, either payload shape)
//! into the store. A file whose content hash was already imported under the
//! same user override is skipped, so re-running an import over the same
//! exports is a no-op. A file that changed since its last import replaces
//! the rows that earlier import contributed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crosscoach_core::ingest::import::{discover_files, LogImporter};
//!
//! let files = discover_files(&["~/exports/*.jsonl".to_string()])?;
//! let result = LogImporter::new(&db).import_all(&files);
//! println!("Imported {} rows from {} files", result.rows_imported, result.files_processed);
//! ```

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::RawLogRow;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Result of importing a batch of files.
#[derive(Debug, Default)]
pub struct ImportResult {
    /// Files whose rows were imported
    pub files_processed: usize,
    /// Files skipped (empty or already imported)
    pub files_skipped: usize,
    /// Total rows imported
    pub rows_imported: usize,
    /// Rows from earlier imports of changed files that were replaced
    pub rows_replaced: usize,
    /// Errors encountered (file path → error message)
    pub errors: Vec<(PathBuf, String)>,
    /// Per-line parse problems
    pub warnings: Vec<String>,
}

/// Result of importing a single file.
#[derive(Debug)]
pub struct FileImportResult {
    pub path: PathBuf,
    /// SHA-256 of the file content, hex encoded
    pub sha256: String,
    pub rows_imported: usize,
    /// Rows an earlier import of this path contributed, now replaced
    pub rows_replaced: usize,
    pub warnings: Vec<String>,
    /// Reason the file was skipped (if skipped)
    pub skip_reason: Option<SkipReason>,
}

/// Reason a file was skipped during import.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// File is empty
    EmptyFile,
    /// The same content was imported before
    AlreadyImported { previous_path: String },
}

/// Imports JSONL exports into a [`Database`].
pub struct LogImporter<'a> {
    db: &'a Database,
    user_override: Option<String>,
    dry_run: bool,
}

impl<'a> LogImporter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            user_override: None,
            dry_run: false,
        }
    }

    /// Attribute every imported row to `user_id`, ignoring the rows' own.
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_override = user_id;
        self
    }

    /// Parse and count without writing anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Import every file, continuing past per-file errors.
    pub fn import_all(&self, files: &[PathBuf]) -> ImportResult {
        self.import_all_with_progress(files, |_, _, _| {})
    }

    /// Import every file with a progress callback.
    ///
    /// The callback receives `(current_file_index, total_files, file_path)`
    /// before each file is processed.
    pub fn import_all_with_progress<F>(&self, files: &[PathBuf], mut on_progress: F) -> ImportResult
    where
        F: FnMut(usize, usize, &Path),
    {
        let total = files.len();
        let mut result = ImportResult::default();

        for (i, path) in files.iter().enumerate() {
            on_progress(i, total, path);

            match self.import_file(path) {
                Ok(file_result) => {
                    if let Some(reason) = &file_result.skip_reason {
                        tracing::debug!(path = %path.display(), reason = ?reason, "File skipped");
                        result.files_skipped += 1;
                    } else {
                        result.files_processed += 1;
                        result.rows_imported += file_result.rows_imported;
                        result.rows_replaced += file_result.rows_replaced;
                    }
                    result.warnings.extend(file_result.warnings);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Import failed");
                    result.errors.push((path.clone(), e.to_string()));
                }
            }
        }

        result
    }

    /// Import a single file.
    pub fn import_file(&self, path: &Path) -> Result<FileImportResult> {
        let content = std::fs::read(path)?;
        let sha256 = hex::encode(Sha256::digest(&content));
        let path_str = path.to_string_lossy().to_string();

        let skipped = |reason: SkipReason| FileImportResult {
            path: path.to_path_buf(),
            sha256: sha256.clone(),
            rows_imported: 0,
            rows_replaced: 0,
            warnings: Vec::new(),
            skip_reason: Some(reason),
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(skipped(SkipReason::EmptyFile));
        }

        let user_override = self.user_override.as_deref();
        if let Some(previous) = self.db.find_import_by_hash(&sha256, user_override)? {
            return Ok(skipped(SkipReason::AlreadyImported {
                previous_path: previous.path,
            }));
        }

        let text = String::from_utf8_lossy(&content);
        let (rows, warnings) = parse_jsonl(&text, &path_str, user_override);

        let (rows_replaced, rows_imported) = if self.dry_run {
            let replaced = self
                .db
                .get_import(&path_str, user_override)?
                .map_or(0, |previous| previous.rows_imported);
            (replaced, rows.len())
        } else {
            self.db.import_log_file(&path_str, user_override, &sha256, &rows)?
        };

        tracing::info!(
            path = %path.display(),
            rows = rows_imported,
            replaced = rows_replaced,
            warnings = warnings.len(),
            dry_run = self.dry_run,
            "Imported log file"
        );

        Ok(FileImportResult {
            path: path.to_path_buf(),
            sha256,
            rows_imported,
            rows_replaced,
            warnings,
            skip_reason: None,
        })
    }
}

/// Parse JSONL content into rows.
///
/// Blank lines are ignored. Lines that fail to parse, or that carry no user
/// id when no override is given, become warnings prefixed with
/// `source:line`.
pub fn parse_jsonl(
    content: &str,
    source: &str,
    user_override: Option<&str>,
) -> (Vec<RawLogRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut warnings = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;

        let mut row: RawLogRow = match serde_json::from_str(line) {
            Ok(row) => row,
            Err(e) => {
                warnings.push(format!("{}:{}: {}", source, line_no, e));
                continue;
            }
        };

        if let Some(user_id) = user_override {
            row.user_id = user_id.to_string();
        }
        if row.user_id.trim().is_empty() {
            warnings.push(format!("{}:{}: missing user_id", source, line_no));
            continue;
        }

        rows.push(row);
    }

    (rows, warnings)
}

/// Expand file arguments into a sorted, de-duplicated list of files.
///
/// Each argument may be a file, a directory (its `*.jsonl` files), or a
/// glob pattern.
pub fn discover_files(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_file() {
            found.insert(path.to_path_buf());
            continue;
        }

        let pattern_str = if path.is_dir() {
            path.join("*.jsonl").to_string_lossy().to_string()
        } else {
            pattern.clone()
        };

        let entries = glob::glob(&pattern_str)
            .map_err(|e| Error::Config(format!("invalid glob pattern {:?}: {}", pattern, e)))?;

        for entry in entries {
            match entry {
                Ok(p) if p.is_file() => {
                    found.insert(p);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to read glob entry"),
            }
        }
    }

    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogPayload;

    const EXPORT: &str = r#"
{"user_id": "u1", "date": "2025-03-01", "domain": "sleep", "metric": "hours", "value": 7.5}
{"user_id": "u1", "date": "2025-03-01", "domain": "mood", "metrics": {"energy": 4}}
not json at all
{"date": "2025-03-02", "domain": "sleep", "metric": "hours", "value": 6}
"#;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_parse_jsonl_collects_warnings() {
        let (rows, warnings) = parse_jsonl(EXPORT, "export.jsonl", None);

        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[1].payload, LogPayload::Bag { .. }));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("export.jsonl:4:"));
        assert_eq!(warnings[1], "export.jsonl:5: missing user_id");
    }

    #[test]
    fn test_parse_jsonl_user_override() {
        let (rows, warnings) = parse_jsonl(EXPORT, "export.jsonl", Some("alice"));

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.user_id == "alice"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_import_file_then_skip_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        std::fs::write(&path, EXPORT).unwrap();
        let db = test_db();
        let importer = LogImporter::new(&db);

        let first = importer.import_file(&path).unwrap();
        assert_eq!(first.rows_imported, 2);
        assert!(first.skip_reason.is_none());
        assert_eq!(db.count_log_rows(Some("u1")).unwrap(), 2);

        // Same bytes under another name are recognized by hash
        let copy = dir.path().join("copy.jsonl");
        std::fs::copy(&path, &copy).unwrap();
        let second = importer.import_file(&copy).unwrap();
        assert_eq!(
            second.skip_reason,
            Some(SkipReason::AlreadyImported {
                previous_path: path.to_string_lossy().to_string()
            })
        );
        assert_eq!(db.count_log_rows(None).unwrap(), 2);
    }

    #[test]
    fn test_reimport_of_appended_file_replaces_earlier_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.jsonl");
        let day_one =
            r#"{"user_id": "u1", "date": "2025-03-01", "domain": "sleep", "metric": "hours", "value": 7}"#;
        let day_two =
            r#"{"user_id": "u1", "date": "2025-03-02", "domain": "sleep", "metric": "hours", "value": 6}"#;
        std::fs::write(&path, format!("{day_one}\n")).unwrap();
        let db = test_db();
        let importer = LogImporter::new(&db);

        importer.import_file(&path).unwrap();
        assert_eq!(db.count_log_rows(Some("u1")).unwrap(), 1);

        std::fs::write(&path, format!("{day_one}\n{day_two}\n")).unwrap();
        let again = importer.import_file(&path).unwrap();

        assert!(again.skip_reason.is_none());
        assert_eq!(again.rows_imported, 2);
        assert_eq!(again.rows_replaced, 1);
        assert_eq!(db.count_log_rows(Some("u1")).unwrap(), 2);
    }

    #[test]
    fn test_same_content_for_another_user_is_imported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        std::fs::write(&path, EXPORT).unwrap();
        let db = test_db();

        LogImporter::new(&db).import_file(&path).unwrap();
        let for_alice = LogImporter::new(&db)
            .with_user(Some("alice".to_string()))
            .import_file(&path)
            .unwrap();

        assert!(for_alice.skip_reason.is_none());
        assert_eq!(for_alice.rows_imported, 3);
        assert_eq!(db.count_log_rows(Some("alice")).unwrap(), 3);
        assert_eq!(db.count_log_rows(Some("u1")).unwrap(), 2);

        // Repeating the override import is the no-op
        let repeat = LogImporter::new(&db)
            .with_user(Some("alice".to_string()))
            .import_file(&path)
            .unwrap();
        assert!(repeat.skip_reason.is_some());
        assert_eq!(db.count_log_rows(None).unwrap(), 5);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        std::fs::write(&path, EXPORT).unwrap();
        let db = test_db();

        let result = LogImporter::new(&db)
            .dry_run(true)
            .import_all(&[path.clone()]);

        assert_eq!(result.files_processed, 1);
        assert_eq!(result.rows_imported, 2);
        assert_eq!(db.count_log_rows(None).unwrap(), 0);
        assert!(db.get_import(&path.to_string_lossy(), None).unwrap().is_none());
    }

    #[test]
    fn test_import_all_reports_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "\n\n").unwrap();
        let missing = dir.path().join("missing.jsonl");
        let db = test_db();

        let result = LogImporter::new(&db).import_all(&[empty, missing.clone()]);

        assert_eq!(result.files_skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, missing);
    }

    #[test]
    fn test_discover_files_dir_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "{}").unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let from_dir = discover_files(&[dir.path().to_string_lossy().to_string()]).unwrap();
        let names: Vec<String> = from_dir
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.jsonl"]);

        let pattern = dir.path().join("*.jsonl").to_string_lossy().to_string();
        let explicit = dir.path().join("a.jsonl").to_string_lossy().to_string();
        let from_glob = discover_files(&[pattern, explicit]).unwrap();
        assert_eq!(from_glob, from_dir);
    }
}
