//! Console summaries of an analysis run.

use std::collections::BTreeMap;
use std::fmt;

use crate::analyzer::EpochRecord;
use crate::trend::{AnalysisResult, AnalysisStatus, ImprovementMode, Series};

const RULE_WIDTH: usize = 60;

/// Human-readable summary of an `AnalysisResult`.
pub struct SummaryReport<'a> {
    pub result: &'a AnalysisResult,
    pub records: &'a [EpochRecord],
}

impl fmt::Display for SummaryReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        let result = self.result;
        writeln!(f, "{}", rule)?;
        writeln!(f, "ESPnet Training Analysis Summary")?;
        writeln!(f, "{}", rule)?;

        let (Some(first), Some(last)) = (self.records.first(), self.records.last()) else {
            writeln!(f, "No epochs found in log file.")?;
            return write!(f, "{}", rule);
        };
        writeln!(
            f,
            "\nEpochs analyzed: {} to {} ({} total)",
            first.epoch,
            last.epoch,
            self.records.len()
        )?;

        let key = result.series_key.as_deref().unwrap_or(&result.metric);
        if let Some(summary) = &result.summary {
            writeln!(f, "\n{}:", key)?;
            writeln!(f, "  First epoch: {:.4} (epoch {})", summary.first_value, summary.first_epoch)?;
            writeln!(f, "  Last epoch:  {:.4} (epoch {})", summary.last_value, summary.last_epoch)?;
            writeln!(f, "  Best epoch:  {:.4} (epoch {})", summary.best_value, summary.best_epoch)?;
            match summary.total_improvement_pct {
                Some(pct) => writeln!(f, "  Total improvement: {:.2}% ({:.4})", pct, summary.total_improvement)?,
                None => writeln!(f, "  Total improvement: {:.4}", summary.total_improvement)?,
            }
        }

        if let AnalysisStatus::InsufficientData { points } = result.status {
            writeln!(
                f,
                "\nNot enough data for {}: {} usable point(s), at least 2 needed.",
                key, points
            )?;
            return write!(f, "{}", rule);
        }

        if let Some(recent) = &result.recent_improvement {
            writeln!(
                f,
                "\nRecent improvement rate (last {} epochs): {:.4}{} per epoch",
                recent.window,
                recent.mean,
                result.mode.unit()
            )?;
        }

        if result.plateaus.is_empty() {
            writeln!(f, "\nNo significant plateaus detected.")?;
        } else {
            writeln!(f, "\nDetected {} plateau region(s):", result.plateaus.len())?;
            for (i, plateau) in result.plateaus.iter().enumerate() {
                writeln!(
                    f,
                    "  {}. Epochs {}-{} ({} epochs, avg improvement: {:.4}{})",
                    i + 1,
                    plateau.start_epoch,
                    plateau.end_epoch,
                    plateau.length,
                    plateau.avg_improvement,
                    result.mode.unit()
                )?;
            }
        }

        match result.suggested_stop_epoch {
            Some(epoch) => writeln!(f, "\n>>> Suggested stop epoch: {}", epoch)?,
            None => writeln!(f, "\n>>> No early stopping recommended yet.")?,
        }
        write!(f, "{}", rule)
    }
}

/// Per-epoch table of the train and validation values of one metric.
pub struct EpochTable<'a> {
    pub records: &'a [EpochRecord],
    pub train_key: Option<&'a str>,
    pub valid_key: Option<&'a str>,
    pub mode: ImprovementMode,
}

impl fmt::Display for EpochTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let improvements: BTreeMap<u32, f64> = self
            .valid_key
            .map(|key| Series::from_records(self.records, key).improvements())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| Some((p.epoch, p.value(self.mode)?)))
            .collect();
        let improvement_label = match self.mode {
            ImprovementMode::Relative => "improvement %",
            ImprovementMode::Absolute => "improvement",
        };

        writeln!(f, "{:>7}  {:>14}  {:>14}  {:>14}", "epoch", "train", "valid", improvement_label)?;
        for record in self.records {
            let train = self.train_key.and_then(|key| record.metric(key));
            let valid = self.valid_key.and_then(|key| record.metric(key));
            let improvement = improvements.get(&record.epoch).copied();
            writeln!(
                f,
                "{:>7}  {:>14}  {:>14}  {:>14}",
                record.epoch,
                cell(train),
                cell(valid),
                cell(improvement)
            )?;
        }
        Ok(())
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string())
}
