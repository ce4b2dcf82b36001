//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/crosscoach/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/crosscoach/` (~/.config/crosscoach/)
//! - Data: `$XDG_DATA_HOME/crosscoach/` (~/.local/share/crosscoach/)
//! - State/Logs: `$XDG_STATE_HOME/crosscoach/` (~/.local/state/crosscoach/)

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Thresholds for manual / exploratory runs
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Thresholds for periodic production runs. Keys left out of the
    /// section keep their production values, not the exploratory ones.
    #[serde(
        default = "AnalysisConfig::scheduled",
        deserialize_with = "deserialize_scheduled"
    )]
    pub scheduled: AnalysisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            scheduled: AnalysisConfig::scheduled(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Largest accepted `lookback_days` (about a century).
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Correlation analysis thresholds.
///
/// Every knob the engine uses comes from here; there are no other defaults
/// baked into the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnalysisConfig {
    /// Series with fewer distinct dates are excluded from pairing
    #[serde(default = "default_min_points_exploratory")]
    pub min_points_per_series: usize,

    /// Pairs sharing fewer dates are skipped
    #[serde(default = "default_min_overlap")]
    pub min_overlap: usize,

    /// Maximum p-value (exclusive) for a correlation to be kept
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,

    /// Minimum |r| (exclusive) for a correlation to be kept
    #[serde(default = "default_min_strength_threshold")]
    pub min_strength_threshold: f64,

    /// Maximum number of positive insights stored
    #[serde(default = "default_top_k")]
    pub top_k_positive: usize,

    /// Maximum number of negative insights stored
    #[serde(default = "default_top_k")]
    pub top_k_negative: usize,

    /// Only consider observations this many days before the run date
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_points_per_series: default_min_points_exploratory(),
            min_overlap: default_min_overlap(),
            significance_threshold: default_significance_threshold(),
            min_strength_threshold: default_min_strength_threshold(),
            top_k_positive: default_top_k(),
            top_k_negative: default_top_k(),
            lookback_days: None,
        }
    }
}

impl AnalysisConfig {
    /// Thresholds for the periodic production run (denser series required).
    pub fn scheduled() -> Self {
        Self {
            min_points_per_series: default_min_points_scheduled(),
            ..Self::default()
        }
    }

    /// Validate thresholds, returning an error message if out of range
    pub fn validate(&self) -> Result<()> {
        if self.min_points_per_series == 0 {
            return Err(Error::Config(
                "min_points_per_series must be at least 1".to_string(),
            ));
        }
        if !(self.significance_threshold > 0.0 && self.significance_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "significance_threshold must be in (0, 1], got {}",
                self.significance_threshold
            )));
        }
        if !(self.min_strength_threshold >= 0.0 && self.min_strength_threshold < 1.0) {
            return Err(Error::Config(format!(
                "min_strength_threshold must be in [0, 1), got {}",
                self.min_strength_threshold
            )));
        }
        if let Some(days) = self.lookback_days.filter(|d| *d > MAX_LOOKBACK_DAYS) {
            return Err(Error::Config(format!(
                "lookback_days must be at most {}, got {}",
                MAX_LOOKBACK_DAYS, days
            )));
        }
        Ok(())
    }
}

/// A threshold section where every key is optional.
#[derive(Debug, Default, Deserialize)]
struct AnalysisOverrides {
    min_points_per_series: Option<usize>,
    min_overlap: Option<usize>,
    significance_threshold: Option<f64>,
    min_strength_threshold: Option<f64>,
    top_k_positive: Option<usize>,
    top_k_negative: Option<usize>,
    lookback_days: Option<u32>,
}

impl AnalysisOverrides {
    fn apply(self, mut base: AnalysisConfig) -> AnalysisConfig {
        if let Some(v) = self.min_points_per_series {
            base.min_points_per_series = v;
        }
        if let Some(v) = self.min_overlap {
            base.min_overlap = v;
        }
        if let Some(v) = self.significance_threshold {
            base.significance_threshold = v;
        }
        if let Some(v) = self.min_strength_threshold {
            base.min_strength_threshold = v;
        }
        if let Some(v) = self.top_k_positive {
            base.top_k_positive = v;
        }
        if let Some(v) = self.top_k_negative {
            base.top_k_negative = v;
        }
        if self.lookback_days.is_some() {
            base.lookback_days = self.lookback_days;
        }
        base
    }
}

/// `[scheduled]` keys layered over [`AnalysisConfig::scheduled`].
fn deserialize_scheduled<'de, D>(deserializer: D) -> std::result::Result<AnalysisConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = AnalysisOverrides::deserialize(deserializer)?;
    Ok(overrides.apply(AnalysisConfig::scheduled()))
}

fn default_min_points_exploratory() -> usize {
    3
}

fn default_min_points_scheduled() -> usize {
    5
}

fn default_min_overlap() -> usize {
    3
}

fn default_significance_threshold() -> f64 {
    0.05
}

fn default_min_strength_threshold() -> f64 {
    0.3
}

fn default_top_k() -> usize {
    3
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analysis.validate()?;
        config.scheduled.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/crosscoach/config.toml` (~/.config/crosscoach/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("crosscoach").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("crosscoach")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("crosscoach")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/crosscoach/data.db` (~/.local/share/crosscoach/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("crosscoach.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Called by CLI binaries before touching any path so every component
    /// resolves the same locations.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
