//! Presentation of parsed records and analysis results.
//!
//! - `summary`: console summary and per-epoch table
//! - `export`: JSON files for other tools
//! - `plot`: PNG charts

pub mod export;
pub mod plot;
pub mod summary;

use std::path::PathBuf;
use thiserror::Error;

pub use export::write_json;
pub use plot::render_charts;
pub use summary::{EpochTable, SummaryReport};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to save chart {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
