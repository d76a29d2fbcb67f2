//! Configuration loading and validation.
//!
//! Settings come from an optional TOML file and CLI overrides. They are
//! validated once, before any log is read, into an `AnalysisConfig` the
//! analysis trusts.

use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::trend::ImprovementMode;

/// Metric families accepted without an `extra-metrics` entry.
pub const KNOWN_METRICS: &[&str] = &[
    "loss",
    "generator_loss",
    "discriminator_loss",
    "mel_loss",
    "kl_loss",
    "dur_loss",
    "adv_loss",
    "feat_match_loss",
    "l1_loss",
    "l2_loss",
    "duration_loss",
    "pitch_loss",
    "energy_loss",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {message}", .path.display())]
    Read { path: PathBuf, message: String },
    #[error("Failed to parse config file: {0}")]
    Parse(String),
    #[error("Unknown metric '{metric}'. Known metrics: {known}")]
    UnknownMetric { metric: String, known: String },
    #[error("'{name}' must be a positive integer, got {value}")]
    NonPositive { name: &'static str, value: i64 },
    #[error("threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f64),
}

/// Raw analysis settings as read from `analyzer.toml` or the command line.
///
/// ```toml
/// metric = "mel_loss"
/// threshold = 0.05
/// consecutive = 15
/// smoothing = 10
/// absolute = false
/// min-epochs = 50
/// extra-metrics = ["ctc_loss"]
/// output-dir = "graphs"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AnalysisSettings {
    /// Metric family to analyse, e.g. `generator_loss` or `mel_loss`.
    pub metric: String,
    /// Plateau threshold, in percent or loss units depending on `absolute`.
    pub threshold: f64,
    /// Improvements below threshold needed to confirm a plateau.
    pub consecutive: i64,
    /// Window for the recent improvement rate and smoothed curves.
    pub smoothing: i64,
    /// Compare raw differences instead of percentages.
    pub absolute: bool,
    /// Earliest epoch a stop suggestion may point at.
    pub min_epochs: u32,
    /// Additional metric families to accept.
    pub extra_metrics: Vec<String>,
    /// Where charts and JSON exports are written.
    pub output_dir: Option<PathBuf>,
    /// Skip printing the per-epoch table.
    pub no_show: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            metric: "generator_loss".to_string(),
            threshold: 0.1,
            consecutive: 10,
            smoothing: 10,
            absolute: false,
            min_epochs: 0,
            extra_metrics: Vec::new(),
            output_dir: None,
            no_show: false,
        }
    }
}

impl AnalysisSettings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
            path: config_path.to_path_buf(),
            message: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check ranges and the metric family.
    pub fn validate(&self) -> Result<AnalysisConfig, ConfigError> {
        if !self.is_known_metric() {
            let mut known: Vec<&str> = KNOWN_METRICS.to_vec();
            known.extend(self.extra_metrics.iter().map(String::as_str));
            return Err(ConfigError::UnknownMetric {
                metric: self.metric.clone(),
                known: known.join(", "),
            });
        }
        if !self.threshold.is_finite() {
            return Err(ConfigError::NonFiniteThreshold(self.threshold));
        }

        Ok(AnalysisConfig {
            metric: self.metric.clone(),
            threshold: self.threshold,
            consecutive: positive("consecutive", self.consecutive)?,
            smoothing: positive("smoothing", self.smoothing)?,
            mode: if self.absolute {
                ImprovementMode::Absolute
            } else {
                ImprovementMode::Relative
            },
            min_epochs: self.min_epochs,
        })
    }

    fn is_known_metric(&self) -> bool {
        let family = self.metric.strip_prefix("valid_").unwrap_or(&self.metric);
        let family = family.strip_prefix("train_").unwrap_or(family);
        let short = family.strip_prefix("generator_").unwrap_or(family);
        let accepts = |name: &str| name == family || name == short;
        KNOWN_METRICS.iter().any(|&m| accepts(m)) || self.extra_metrics.iter().any(|m| accepts(m.as_str()))
    }
}

fn positive(name: &'static str, value: i64) -> Result<NonZeroUsize, ConfigError> {
    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(ConfigError::NonPositive { name, value })
}

/// Validated analysis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub metric: String,
    pub threshold: f64,
    pub consecutive: NonZeroUsize,
    pub smoothing: NonZeroUsize,
    pub mode: ImprovementMode,
    pub min_epochs: u32,
}
