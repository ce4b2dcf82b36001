//! Database layer for crosscoach
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - The [`LogSource`](crate::analysis::LogSource) and
//!   [`InsightSink`](crate::analysis::InsightSink) implementations the engine runs against

pub mod repo;
pub mod schema;

pub use repo::{AnalysisRunRecord, Database, ImportRecord};
