//! JSON export of parsed records and analysis results.

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::analyzer::{EpochRecord, ParseWarning};
use crate::trend::AnalysisResult;

use super::ReportError;

pub const EPOCHS_FILE: &str = "epochs.json";
pub const ANALYSIS_FILE: &str = "analysis.json";

#[derive(Serialize)]
struct EpochsExport<'a> {
    records: &'a [EpochRecord],
    warnings: Vec<String>,
}

/// Write `epochs.json` and `analysis.json` into `output_dir`.
pub fn write_json(
    output_dir: &Path,
    records: &[EpochRecord],
    warnings: &[ParseWarning],
    result: &AnalysisResult,
) -> Result<Vec<PathBuf>, ReportError> {
    let epochs = EpochsExport {
        records,
        warnings: warnings.iter().map(ToString::to_string).collect(),
    };
    let epochs_path = output_dir.join(EPOCHS_FILE);
    write_pretty(&epochs_path, &epochs)?;

    let analysis_path = output_dir.join(ANALYSIS_FILE);
    write_pretty(&analysis_path, result)?;

    Ok(vec![epochs_path, analysis_path])
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
    let io_error = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error)?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}
