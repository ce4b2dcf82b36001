//! crosscoach-analyze - CLI tool to run correlation analysis on daily logs
//!
//! Finds relationships between tracked metrics, stores the strongest ones as
//! insights, and displays them.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/crosscoach/data.db (~/.local/share/crosscoach/data.db)
//! - Logs: $XDG_STATE_HOME/crosscoach/crosscoach.log
//! - Config: $XDG_CONFIG_HOME/crosscoach/config.toml

mod process_lock;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use crosscoach_core::analysis::RunSummary;
use crosscoach_core::{
    AnalysisConfig, Config, CorrelationEngine, Database, LogSource, RankBucket, StoredInsight,
};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::{acquire_watch_guard, try_acquire_user_lock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "crosscoach-analyze")]
#[command(about = "Discover correlations between tracked metrics and store insights")]
#[command(version)]
struct Args {
    /// User ID to analyze. If not provided, analyzes all users
    #[arg(short, long)]
    user: Option<String>,

    /// Use the [scheduled] thresholds instead of [analysis]
    #[arg(long)]
    scheduled: bool,

    /// Override the minimum number of dates a series needs
    #[arg(long)]
    min_points: Option<usize>,

    /// Date the lookback window is measured from (YYYY-MM-DD, default today)
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Compute and print insights without replacing stored ones
    #[arg(long)]
    dry_run: bool,

    /// Print stored insights without running analysis
    #[arg(long, conflicts_with_all = ["dry_run", "watch"])]
    show: bool,

    /// Watch mode - re-run analysis periodically until Ctrl+C
    #[arg(short, long)]
    watch: bool,

    /// Minutes between runs (only with --watch)
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    interval_mins: u64,
}

impl Args {
    fn json(&self) -> bool {
        self.format == "json"
    }
}

/// Results of one pass over the selected users.
struct Pass {
    summaries: Vec<RunSummary>,
    /// Users whose analysis was already running elsewhere
    busy: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        crosscoach_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let analysis_config = select_config(&config, &args)?;

    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    if args.show {
        return show_insights(&db, &args);
    }

    let engine = CorrelationEngine::new(analysis_config);

    if args.watch {
        return run_watch_mode(&engine, &db, &db_path, &args);
    }

    let users = target_users(&db, &args)?;
    if users.is_empty() {
        if args.json() {
            println!("[]");
            return Ok(());
        }
        println!("No users found in database.");
        println!("Run 'crosscoach-import' first to load daily logs.");
        return Ok(());
    }

    if !args.json() {
        println!("Analyzing {} user(s)...\n", users.len());
    }

    let pb = if args.json() || users.len() < 2 {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(users.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("invalid progress bar template")?
                .progress_chars("#>-"),
        );
        pb
    };

    let pass = run_pass(&engine, &db, &db_path, &users, &args, &pb)?;
    pb.finish_and_clear();

    if args.json() {
        println!("{}", serde_json::to_string_pretty(&pass.summaries)?);
    } else {
        for summary in &pass.summaries {
            print_summary(summary, args.dry_run);
        }
        print_totals(&pass);
    }

    // A single requested user that failed makes the command fail
    if let (Some(user_id), [summary]) = (&args.user, pass.summaries.as_slice()) {
        if !summary.is_success() {
            anyhow::bail!(
                "analysis failed for user '{}': {}",
                user_id,
                summary.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Pick the threshold profile and apply command-line overrides.
fn select_config(config: &Config, args: &Args) -> Result<AnalysisConfig> {
    let mut analysis = if args.scheduled {
        config.scheduled.clone()
    } else {
        config.analysis.clone()
    };

    if let Some(min_points) = args.min_points {
        analysis.min_points_per_series = min_points;
    }
    analysis.validate().context("invalid analysis thresholds")?;

    Ok(analysis)
}

fn target_users(db: &Database, args: &Args) -> Result<Vec<String>> {
    match &args.user {
        Some(user_id) => Ok(vec![user_id.clone()]),
        None => db.user_ids().context("failed to list users"),
    }
}

/// Run every user once, skipping users locked by another process.
fn run_pass(
    engine: &CorrelationEngine,
    db: &Database,
    db_path: &Path,
    users: &[String],
    args: &Args,
    pb: &ProgressBar,
) -> Result<Pass> {
    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let mut pass = Pass {
        summaries: Vec::with_capacity(users.len()),
        busy: Vec::new(),
    };

    for user_id in users {
        pb.set_message(user_id.clone());

        let Some(_user_lock) = try_acquire_user_lock(db_path, user_id)
            .with_context(|| format!("failed to acquire lock for user '{}'", user_id))?
        else {
            tracing::warn!(user_id = %user_id, "Analysis already running for user, skipping");
            pb.suspend(|| {
                eprintln!("Warning: analysis already running for '{}', skipped", user_id)
            });
            pass.busy.push(user_id.clone());
            pb.inc(1);
            continue;
        };

        let summary = if args.dry_run {
            engine.preview_as_of(db, user_id, as_of)
        } else {
            engine.run_as_of(db, db, user_id, as_of)
        };
        pass.summaries.push(summary);
        pb.inc(1);
    }

    Ok(pass)
}

/// Run continuous watch mode
fn run_watch_mode(
    engine: &CorrelationEngine,
    db: &Database,
    db_path: &Path,
    args: &Args,
) -> Result<()> {
    let _watch_guard = acquire_watch_guard(db_path).context("failed to acquire process lock")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let interval = Duration::from_secs(args.interval_mins * 60);

    println!(
        "Watch mode active (every {} min). Press Ctrl+C to stop.",
        args.interval_mins
    );
    println!();

    let mut iteration = 0u64;

    while running.load(Ordering::SeqCst) {
        iteration += 1;

        // Users may appear between passes as new logs are imported
        let users = target_users(db, args)?;
        let pass = run_pass(engine, db, db_path, &users, args, &ProgressBar::hidden())?;

        let failed = pass.summaries.iter().filter(|s| !s.is_success()).count();
        let stored: usize = pass
            .summaries
            .iter()
            .map(|s| s.positive_stored + s.negative_stored)
            .sum();

        let timestamp = chrono::Local::now().format("%H:%M:%S");
        println!(
            "[{}] Analyzed {} user(s), {} failed, {} skipped, {} insights stored",
            timestamp,
            pass.summaries.len(),
            failed,
            pass.busy.len(),
            stored
        );
        for summary in pass.summaries.iter().filter(|s| !s.is_success()) {
            println!(
                "  {}: {}",
                summary.user_id,
                summary.error_message.as_deref().unwrap_or("unknown error")
            );
        }

        tracing::info!(
            iteration,
            users = pass.summaries.len(),
            failed,
            skipped = pass.busy.len(),
            "watch analysis iteration"
        );

        sleep_while_running(&running, interval);
    }

    println!("Watch mode stopped.");
    tracing::info!("crosscoach-analyze watch mode stopped");

    Ok(())
}

/// Sleep for `total`, waking early once `running` is cleared.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(500);
    let mut slept = Duration::ZERO;
    while slept < total && running.load(Ordering::SeqCst) {
        thread::sleep(step);
        slept += step;
    }
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!("User: {}", summary.user_id);

    let status_icon = if summary.is_success() { "+" } else { "!" };
    let analysis = &summary.analysis;
    println!(
        "  [{}] {} series, {} pairs evaluated, {} significant ({}ms)",
        status_icon,
        analysis.series_considered,
        analysis.pairs_evaluated,
        analysis.pairs_significant,
        summary.duration_ms
    );

    if analysis.invalid_records > 0 {
        println!(
            "      Skipped {} of {} log rows as invalid",
            analysis.invalid_records, analysis.records_fetched
        );
    }

    if let Some(ref e) = summary.error_message {
        let step = summary.failed_at.map(|s| s.as_str()).unwrap_or("unknown");
        println!("      Failed while {}: {}", step, e);
    }

    for insight in summary.insights() {
        let sign = match insight.rank_bucket {
            RankBucket::Positive => "+",
            RankBucket::Negative => "-",
        };
        println!(
            "      {} {} (r={:.3}, p={:.4}, n={})",
            sign, insight.description, insight.correlation_score, insight.p_value, insight.n_overlap
        );
    }

    if summary.is_success() {
        if dry_run {
            println!("      (dry run, stored insights unchanged)");
        } else {
            println!(
                "      Stored {} positive, {} negative",
                summary.positive_stored, summary.negative_stored
            );
        }
    }
    println!();
}

fn print_totals(pass: &Pass) {
    let failed = pass.summaries.iter().filter(|s| !s.is_success()).count();
    let insights: usize = pass.summaries.iter().map(|s| s.insights().len()).sum();

    println!("---");
    println!(
        "Analyzed {} user(s), {} failed, {} insights",
        pass.summaries.len(),
        failed,
        insights
    );
    if !pass.busy.is_empty() {
        println!("Skipped (already running): {}", pass.busy.join(", "));
    }
}

/// Print the insights currently stored for the selected users.
fn show_insights(db: &Database, args: &Args) -> Result<()> {
    let users = target_users(db, args)?;

    let mut stored = Vec::with_capacity(users.len());
    for user_id in &users {
        let insights = db
            .get_insights(user_id)
            .with_context(|| format!("failed to load insights for user '{}'", user_id))?;
        stored.push((user_id, insights));
    }

    if args.json() {
        let output: Vec<_> = stored
            .iter()
            .map(|(user_id, insights)| {
                serde_json::json!({
                    "user_id": user_id,
                    "insights": insights,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if stored.is_empty() {
        println!("No users found in database.");
        return Ok(());
    }

    for (user_id, insights) in &stored {
        println!("User: {}", user_id);
        print_bucket("Positive", RankBucket::Positive, insights);
        print_bucket("Negative", RankBucket::Negative, insights);
        println!();
    }

    Ok(())
}

fn print_bucket(label: &str, bucket: RankBucket, insights: &[StoredInsight]) {
    println!("  {}:", label);
    let mut any = false;
    for stored in insights.iter().filter(|s| s.insight.rank_bucket == bucket) {
        any = true;
        println!(
            "    {}. {} (r={:.3}, p={:.4}, n={})",
            stored.rank,
            stored.insight.description,
            stored.insight.correlation_score,
            stored.insight.p_value,
            stored.insight.n_overlap
        );
    }
    if !any {
        println!("    (none)");
    }
}
