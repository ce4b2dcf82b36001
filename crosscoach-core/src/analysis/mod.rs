//! Correlation discovery and insight generation
//!
//! The pipeline, one module per stage:
//!
//! - [`series`]: group observations into per-key daily series
//! - [`correlation`]: Pearson r and p-value for every series pair
//! - [`selector`]: significance and strength filters, top-K per sign
//! - [`render`]: natural-language description of a selected correlation
//! - [`engine`]: run orchestration against a [`LogSource`] and [`InsightSink`]
//!
//! [`stats`] holds the numeric routines (Pearson, Student-t via the
//! incomplete beta function).

pub mod correlation;
pub mod engine;
pub mod render;
pub mod selector;
pub mod series;
pub mod stats;

pub use correlation::{correlate_all, correlate_pair, CorrelationReport, CorrelationResult};
pub use engine::{Analysis, CorrelationEngine, InsightSink, LogSource, RunState, RunSummary};
pub use render::{describe, render};
pub use selector::{is_notable, select, Selected};
pub use series::{build_series, Series, SeriesSet};
