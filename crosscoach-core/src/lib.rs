//! # crosscoach-core
//!
//! Core library for crosscoach - personal analytics across life domains.
//!
//! This library provides:
//! - Domain types for log rows, series keys and insights
//! - The correlation engine that turns daily logs into ranked insights
//! - Database storage layer with SQLite
//! - JSONL import of exported logs
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through the analysis pipeline in one direction:
//!
//! ```text
//! raw log rows → ingest adapter → series builder → correlation
//!              → selector → renderer → insight sink (atomic replace)
//! ```
//!
//! The engine reaches storage only through the [`LogSource`] and
//! [`InsightSink`] traits, which [`Database`] implements.
//!
//! ## Example
//!
//! ```rust,no_run
//! use crosscoach_core::{Config, CorrelationEngine, Database};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let engine = CorrelationEngine::new(config.analysis);
//! let summary = engine.run(&db, &db, "user-1");
//! println!("{} insights", summary.insights().len());
//! ```

// Re-export commonly used items at the crate root
pub use analysis::{CorrelationEngine, InsightSink, LogSource, RunState, RunSummary};
pub use config::{AnalysisConfig, Config};
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod types;
