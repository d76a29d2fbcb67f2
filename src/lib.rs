//! Training-log analysis for ESPnet-style recipes.
//!
//! `analyzer` turns raw log text into ordered per-epoch metric records,
//! `trend` derives improvement, plateaus and a suggested stop epoch from them,
//! and `report` presents both.

pub mod analyzer;
pub mod config;
pub mod report;
pub mod trend;

pub use analyzer::{EpochRecord, ParseWarning, ParsedLog, load_logs, parse_lines};
pub use config::{AnalysisConfig, AnalysisSettings, ConfigError};
pub use trend::{AnalysisResult, analyze};
