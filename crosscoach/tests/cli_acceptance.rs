use crosscoach_core::{Database, RankBucket};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    exports: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let exports = base.join("exports");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &exports, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        seed_log_fixture(&exports);

        Self {
            _temp_dir: temp_dir,
            home,
            exports,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("crosscoach/data.db")
    }

    fn fixture(&self) -> String {
        self.exports
            .join("daily-logs.jsonl")
            .to_string_lossy()
            .into_owned()
    }

    fn open_db(&self) -> Database {
        let db = Database::open(&self.db_path()).expect("failed to open db");
        db.migrate().expect("failed to migrate db");
        db
    }
}

fn seed_log_fixture(exports: &std::path::Path) {
    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../crosscoach-core/tests/fixtures/logs/daily-logs.jsonl");
    fs::copy(source, exports.join("daily-logs.jsonl")).expect("failed to copy log fixture");
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "crosscoach-import" => PathBuf::from(assert_cmd::cargo::cargo_bin!("crosscoach-import")),
        "crosscoach-analyze" => PathBuf::from(assert_cmd::cargo::cargo_bin!("crosscoach-analyze")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn import_fixture(env: &CliTestEnv) {
    let fixture = env.fixture();
    let output = run_bin(env, "crosscoach-import", &[&fixture]);
    assert_success("crosscoach-import", &[&fixture], &output);
}

#[test]
fn import_loads_fixture_and_skips_reimport() {
    let env = CliTestEnv::new();
    let fixture = env.fixture();

    let output = run_bin(&env, "crosscoach-import", &[&fixture]);
    assert_success("crosscoach-import", &[&fixture], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Import complete:"));
    assert!(
        stdout.contains("Rows imported:   37"),
        "expected import summary in stdout, got:\n{stdout}"
    );

    let db = env.open_db();
    assert_eq!(db.count_log_rows(None).unwrap(), 37);

    // Importing the same directory again is a no-op
    let exports = env.exports.to_string_lossy().into_owned();
    let again = run_bin(&env, "crosscoach-import", &[&exports]);
    assert_success("crosscoach-import", &[&exports], &again);
    let again_stdout = String::from_utf8_lossy(&again.stdout);
    assert!(again_stdout.contains("Files skipped:   1"));
    assert_eq!(db.count_log_rows(None).unwrap(), 37);
}

#[test]
fn import_picks_up_rows_appended_to_an_export() {
    let env = CliTestEnv::new();
    let log = env.exports.join("today.jsonl");
    let day_one =
        r#"{"user_id": "kim", "date": "2025-04-01", "domain": "sleep", "metric": "hours", "value": 7}"#;
    let day_two =
        r#"{"user_id": "kim", "date": "2025-04-02", "domain": "sleep", "metric": "hours", "value": 8}"#;
    fs::write(&log, format!("{day_one}\n")).expect("failed to write export");
    let log = log.to_string_lossy().into_owned();

    let output = run_bin(&env, "crosscoach-import", &[&log]);
    assert_success("crosscoach-import", &[&log], &output);

    fs::write(&log, format!("{day_one}\n{day_two}\n")).expect("failed to append export");
    let output = run_bin(&env, "crosscoach-import", &[&log]);
    assert_success("crosscoach-import", &[&log], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Rows replaced:   1"), "unexpected output:\n{stdout}");
    assert_eq!(env.open_db().count_log_rows(Some("kim")).unwrap(), 2);
}

#[test]
fn import_dry_run_writes_nothing() {
    let env = CliTestEnv::new();
    let fixture = env.fixture();

    let output = run_bin(&env, "crosscoach-import", &["--dry-run", &fixture]);
    assert_success("crosscoach-import", &["--dry-run", &fixture], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dry run - nothing written:"));
    assert_eq!(env.open_db().count_log_rows(None).unwrap(), 0);
}

#[test]
fn analyze_all_users_stores_insights() {
    let env = CliTestEnv::new();
    import_fixture(&env);

    let output = run_bin(&env, "crosscoach-analyze", &["--format", "text"]);
    assert_success("crosscoach-analyze", &["--format", "text"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Analyzing 2 user(s)"));
    assert!(
        stdout.contains("Analyzed 2 user(s), 0 failed, 2 insights"),
        "unexpected analyze output:\n{stdout}"
    );

    let db = env.open_db();
    let alex = db.get_insights("alex").unwrap();
    assert_eq!(alex.len(), 1);
    assert_eq!(alex[0].insight.rank_bucket, RankBucket::Positive);
    let sam = db.get_insights("sam").unwrap();
    assert_eq!(sam.len(), 1);
    assert_eq!(sam[0].insight.rank_bucket, RankBucket::Negative);
    assert_eq!(db.get_analysis_runs(None, 10).unwrap().len(), 2);
}

#[test]
fn analyze_single_user_json_then_show() {
    let env = CliTestEnv::new();
    import_fixture(&env);

    let args = ["--user", "alex", "--format", "json"];
    let output = run_bin(&env, "crosscoach-analyze", &args);
    assert_success("crosscoach-analyze", &args, &output);

    let summaries: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("analyze output should be JSON");
    let summary = &summaries[0];
    assert_eq!(summary["user_id"], "alex");
    assert_eq!(summary["state"], "done");
    assert_eq!(summary["series_considered"], 4);
    assert_eq!(summary["positive_stored"], 1);
    assert_eq!(
        summary["insights"][0]["description"],
        "Climbing grade and Sleep hours show a strong positive correlation (100.0% relationship)"
    );

    let show_args = ["--show", "--user", "alex"];
    let show = run_bin(&env, "crosscoach-analyze", &show_args);
    assert_success("crosscoach-analyze", &show_args, &show);
    let show_stdout = String::from_utf8_lossy(&show.stdout);
    assert!(show_stdout.contains("User: alex"));
    assert!(show_stdout
        .contains("1. Climbing grade and Sleep hours show a strong positive correlation"));
    assert!(show_stdout.contains("Negative:\n    (none)"));
}

#[test]
fn analyze_dry_run_leaves_store_untouched() {
    let env = CliTestEnv::new();
    import_fixture(&env);

    let args = ["--user", "sam", "--dry-run"];
    let output = run_bin(&env, "crosscoach-analyze", &args);
    assert_success("crosscoach-analyze", &args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Coding hours and Sleep hours show a strong negative correlation"));
    assert!(stdout.contains("(dry run, stored insights unchanged)"));

    let db = env.open_db();
    assert!(db.get_insights("sam").unwrap().is_empty());
    assert!(db.get_analysis_runs(Some("sam"), 10).unwrap().is_empty());
}

#[test]
fn analyze_scheduled_profile_drops_sparse_series() {
    let env = CliTestEnv::new();
    import_fixture(&env);

    // min_points 8 exceeds every fixture series
    let args = ["--user", "alex", "--min-points", "8", "--format", "json"];
    let output = run_bin(&env, "crosscoach-analyze", &args);
    assert_success("crosscoach-analyze", &args, &output);

    let summaries: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("analyze output should be JSON");
    assert_eq!(summaries[0]["series_considered"], 0);
    assert_eq!(summaries[0]["insights"].as_array().map(Vec::len), Some(0));

    let scheduled = ["--user", "sam", "--scheduled", "--format", "json"];
    let output = run_bin(&env, "crosscoach-analyze", &scheduled);
    assert_success("crosscoach-analyze", &scheduled, &output);
    let summaries: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("analyze output should be JSON");
    assert_eq!(summaries[0]["state"], "done");
}

#[test]
fn analyze_exits_nonzero_when_user_run_fails() {
    let env = CliTestEnv::new();
    let broken = env.exports.join("broken.jsonl");
    fs::write(
        &broken,
        concat!(
            r#"{"user_id": "broken", "date": "yesterday", "domain": "sleep", "metric": "hours", "value": 7}"#,
            "\n",
            r#"{"user_id": "broken", "date": "2025-02-30", "domain": "sleep", "metric": "hours", "value": 8}"#,
            "\n",
        ),
    )
    .expect("failed to write broken export");
    let broken = broken.to_string_lossy().into_owned();
    let output = run_bin(&env, "crosscoach-import", &[&broken]);
    assert_success("crosscoach-import", &[&broken], &output);

    let output = run_bin(&env, "crosscoach-analyze", &["--user", "broken"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("analysis failed for user 'broken'"),
        "unexpected stderr:\n{stderr}"
    );
}
