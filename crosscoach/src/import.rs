//! crosscoach-import - CLI tool to load exported daily logs into the database
//!
//! Accepts JSONL files, directories (their `*.jsonl` files) and glob
//! patterns. Files already imported (by content hash) are skipped; a file
//! that changed since its last import replaces the rows it contributed.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use crosscoach_core::ingest::import::{discover_files, ImportResult, LogImporter};
use crosscoach_core::{Config, Database};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "crosscoach-import")]
#[command(about = "Load JSONL daily log exports into the database")]
#[command(version)]
struct Args {
    /// Files, directories or glob patterns to import
    #[arg(required = true)]
    paths: Vec<String>,

    /// Attribute every imported row to this user
    #[arg(short, long)]
    user: Option<String>,

    /// Parse and count rows without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Verbose output (-v lists warnings)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        crosscoach_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("crosscoach-import starting");

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let files = discover_files(&args.paths).context("failed to resolve input paths")?;
    if files.is_empty() {
        anyhow::bail!("no files matched {}", args.paths.join(", "));
    }

    println!("Database: {}", db_path.display());
    println!("Found {} file(s) to import", files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("invalid progress bar template")?
            .progress_chars("#>-"),
    );

    let importer = LogImporter::new(&db)
        .with_user(args.user.clone())
        .dry_run(args.dry_run);

    let result = importer.import_all_with_progress(&files, |current, _total, path| {
        pb.set_position(current as u64);
        pb.set_message(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("...")
                .to_string(),
        );
    });

    pb.finish_and_clear();

    print_import_result(&result, args.dry_run, args.verbose);

    tracing::info!(
        files_processed = result.files_processed,
        files_skipped = result.files_skipped,
        rows_imported = result.rows_imported,
        rows_replaced = result.rows_replaced,
        errors = result.errors.len(),
        "crosscoach-import complete"
    );

    if result.files_processed == 0 && !result.errors.is_empty() {
        anyhow::bail!("every file failed to import");
    }

    Ok(())
}

fn print_import_result(result: &ImportResult, dry_run: bool, verbose: u8) {
    if dry_run {
        println!("\nDry run - nothing written:");
    } else {
        println!("\nImport complete:");
    }
    println!("  Files processed: {}", result.files_processed);
    println!("  Files skipped:   {}", result.files_skipped);
    println!("  Rows imported:   {}", result.rows_imported);
    if result.rows_replaced > 0 {
        println!("  Rows replaced:   {}", result.rows_replaced);
    }

    if !result.warnings.is_empty() {
        println!("  Warnings:        {}", result.warnings.len());
        if verbose >= 1 {
            for warning in &result.warnings {
                println!("    {}", warning);
            }
        }
    }

    if !result.errors.is_empty() {
        println!("\nErrors ({}):", result.errors.len());
        for (path, err) in &result.errors {
            println!("  {}: {}", path.display(), err);
        }
    }
}
