//! Trend analysis over parsed epoch records.
//!
//! Everything here is a pure function of the records and an `AnalysisConfig`.

pub mod analysis;
pub mod plateau;
pub mod series;

pub use analysis::{AnalysisResult, AnalysisStatus, RecentImprovement, SeriesSummary, analyze};
pub use plateau::{PlateauRegion, detect_plateaus};
pub use series::{ImprovementMode, ImprovementPoint, Series, SeriesPoint, rolling_mean, train_key, validation_key};
