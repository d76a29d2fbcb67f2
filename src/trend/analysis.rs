//! Diminishing-returns analysis of a validation-loss series.

use serde::Serialize;

use crate::analyzer::EpochRecord;
use crate::config::AnalysisConfig;

use super::plateau::{PlateauRegion, detect_plateaus};
use super::series::{ImprovementMode, ImprovementPoint, Series, validation_key};

/// Minimum number of series points needed for any trend output.
pub const MIN_POINTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    /// Fewer than two usable points; no plateau or stop output is produced.
    InsufficientData { points: usize },
}

/// First/last/best figures of the analysed series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub points: usize,
    pub first_epoch: u32,
    pub last_epoch: u32,
    pub first_value: f64,
    pub last_value: f64,
    /// Epoch with the lowest value (earliest on ties).
    pub best_epoch: u32,
    pub best_value: f64,
    /// `first_value - last_value`.
    pub total_improvement: f64,
    /// Total improvement as a percentage of the first value.
    pub total_improvement_pct: Option<f64>,
}

/// Mean improvement over the most recent points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentImprovement {
    /// Number of improvement points averaged (at most the smoothing window).
    pub window: usize,
    /// Mean, in the unit of the detection mode.
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Metric family as configured.
    pub metric: String,
    /// Record key the series was built from, if any record carries it.
    pub series_key: Option<String>,
    pub mode: ImprovementMode,
    pub threshold: f64,
    pub consecutive: usize,
    #[serde(flatten)]
    pub status: AnalysisStatus,
    pub summary: Option<SeriesSummary>,
    pub recent_improvement: Option<RecentImprovement>,
    pub plateaus: Vec<PlateauRegion>,
    /// Start of the first plateau at or after `min_epochs`.
    pub suggested_stop_epoch: Option<u32>,
}

impl AnalysisResult {
    pub fn is_complete(&self) -> bool {
        self.status == AnalysisStatus::Complete
    }
}

/// Analyse the validation series of `config.metric`.
///
/// Pure and deterministic: the same records and configuration always give
/// the same result. Too little data is a well-defined result, not an error.
pub fn analyze(records: &[EpochRecord], config: &AnalysisConfig) -> AnalysisResult {
    let series_key = validation_key(records, &config.metric);
    let series = series_key
        .as_deref()
        .map(|key| Series::from_records(records, key));
    let points = series.as_ref().map_or(0, Series::len);

    let mut result = AnalysisResult {
        metric: config.metric.clone(),
        series_key,
        mode: config.mode,
        threshold: config.threshold,
        consecutive: config.consecutive.get(),
        status: AnalysisStatus::InsufficientData { points },
        summary: series.as_ref().and_then(summarize),
        recent_improvement: None,
        plateaus: Vec::new(),
        suggested_stop_epoch: None,
    };

    let Some(series) = series.filter(|s| s.len() >= MIN_POINTS) else {
        log::warn!(
            "Not enough data for '{}': {} usable point(s), need {}",
            config.metric,
            points,
            MIN_POINTS
        );
        return result;
    };

    let improvements = series.improvements();
    let plateaus = detect_plateaus(&improvements, config.mode, config.threshold, config.consecutive);
    log::debug!("{} improvement point(s), {} plateau(s)", improvements.len(), plateaus.len());

    result.status = AnalysisStatus::Complete;
    result.recent_improvement = recent_improvement(&improvements, config.mode, config.smoothing.get());
    result.suggested_stop_epoch = plateaus
        .iter()
        .find(|plateau| plateau.start_epoch >= config.min_epochs)
        .map(|plateau| plateau.start_epoch);
    result.plateaus = plateaus;
    result
}

fn summarize(series: &Series) -> Option<SeriesSummary> {
    let points = series.points();
    let first = points.first()?;
    let last = points.last()?;
    let best = points
        .iter()
        .fold(first, |best, point| if point.value < best.value { point } else { best });

    let total_improvement = first.value - last.value;
    Some(SeriesSummary {
        points: points.len(),
        first_epoch: first.epoch,
        last_epoch: last.epoch,
        first_value: first.value,
        last_value: last.value,
        best_epoch: best.epoch,
        best_value: best.value,
        total_improvement,
        total_improvement_pct: (first.value != 0.0).then(|| 100.0 * total_improvement / first.value.abs()),
    })
}

fn recent_improvement(
    improvements: &[ImprovementPoint],
    mode: ImprovementMode,
    window: usize,
) -> Option<RecentImprovement> {
    let values: Vec<f64> = improvements.iter().filter_map(|p| p.value(mode)).collect();
    let recent = &values[values.len().saturating_sub(window)..];
    if recent.is_empty() {
        return None;
    }
    Some(RecentImprovement {
        window: recent.len(),
        mean: recent.iter().sum::<f64>() / recent.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisSettings;

    fn records(values: &[(u32, f64)]) -> Vec<EpochRecord> {
        values
            .iter()
            .map(|(epoch, value)| {
                let mut record = EpochRecord::new(*epoch);
                record.metrics.insert("generator_loss".to_string(), value + 1.0);
                record.metrics.insert("valid_generator_loss".to_string(), *value);
                record
            })
            .collect()
    }

    fn config(settings: AnalysisSettings) -> AnalysisConfig {
        settings.validate().unwrap()
    }

    #[test]
    fn test_total_improvement_without_plateau() {
        let records = records(&[(1, 47.114), (2, 40.0), (3, 38.5), (4, 37.0), (415, 35.933)]);
        let result = analyze(&records, &config(AnalysisSettings::default()));

        assert!(result.is_complete());
        assert_eq!(result.series_key.as_deref(), Some("valid_generator_loss"));
        let summary = result.summary.as_ref().unwrap();
        assert_eq!((summary.first_epoch, summary.last_epoch), (1, 415));
        assert_eq!(format!("{:.2}", summary.total_improvement_pct.unwrap()), "23.73");
        assert_eq!(summary.best_epoch, 415);
        assert!(result.plateaus.is_empty());
        assert_eq!(result.suggested_stop_epoch, None);
    }

    #[test]
    fn test_slow_descent_is_a_plateau_from_the_start() {
        // Constant step of 0.01 on values around 40: every relative improvement is < 0.1%.
        let values: Vec<(u32, f64)> = (1..=30).map(|e| (e, 40.0 - 0.01 * e as f64)).collect();
        let result = analyze(&records(&values), &config(AnalysisSettings::default()));

        assert_eq!(result.plateaus.len(), 1);
        assert_eq!(result.plateaus[0].start_epoch, 2);
        assert_eq!(result.plateaus[0].end_epoch, 30);
        assert_eq!(result.plateaus[0].length, 29);
        assert_eq!(result.suggested_stop_epoch, Some(2));
    }

    #[test]
    fn test_stop_epoch_is_start_of_first_plateau() {
        // Fast progress for 10 epochs, then a flat tail.
        let mut values: Vec<(u32, f64)> = (1..=10).map(|e| (e, 100.0 - 5.0 * e as f64)).collect();
        values.extend((11..=25).map(|e| (e, 50.0)));
        let settings = AnalysisSettings {
            consecutive: 5,
            ..Default::default()
        };
        let result = analyze(&records(&values), &config(settings));

        assert_eq!(result.plateaus.len(), 1);
        // Epoch 11 is the first point with 0% improvement (50 -> 50).
        assert_eq!(result.plateaus[0].start_epoch, 11);
        assert_eq!(result.suggested_stop_epoch, Some(11));
    }

    #[test]
    fn test_missing_value_does_not_break_plateau() {
        let mut records = records(&[(1, 10.0), (2, 10.0), (3, 10.0), (4, 10.0), (5, 10.0)]);
        records[2].metrics.remove("valid_generator_loss");
        let settings = AnalysisSettings {
            consecutive: 3,
            ..Default::default()
        };
        let result = analyze(&records, &config(settings));

        assert!(result.is_complete());
        assert_eq!(result.plateaus.len(), 1);
        let plateau = &result.plateaus[0];
        assert_eq!((plateau.start_epoch, plateau.end_epoch), (2, 5));
        assert_eq!(plateau.length, 3);
        assert_eq!(result.suggested_stop_epoch, Some(2));
    }

    #[test]
    fn test_min_epochs_skips_early_plateaus() {
        let values = [(1, 10.0), (2, 10.0), (3, 10.0), (4, 5.0), (5, 5.0), (6, 5.0)];
        let settings = AnalysisSettings {
            consecutive: 2,
            min_epochs: 4,
            ..Default::default()
        };
        let result = analyze(&records(&values), &config(settings));
        let starts: Vec<u32> = result.plateaus.iter().map(|p| p.start_epoch).collect();
        assert_eq!(starts, vec![2, 5]);
        assert_eq!(result.suggested_stop_epoch, Some(5));
    }

    #[test]
    fn test_insufficient_data() {
        let result = analyze(&records(&[(1, 3.0)]), &config(AnalysisSettings::default()));
        assert_eq!(result.status, AnalysisStatus::InsufficientData { points: 1 });
        assert!(result.plateaus.is_empty());
        assert_eq!(result.suggested_stop_epoch, None);
        assert_eq!(result.recent_improvement, None);
        assert_eq!(result.summary.as_ref().map(|s| s.points), Some(1));

        let settings = AnalysisSettings {
            metric: "mel_loss".to_string(),
            ..Default::default()
        };
        let result = analyze(&records(&[(1, 3.0), (2, 2.0)]), &config(settings));
        assert_eq!(result.status, AnalysisStatus::InsufficientData { points: 0 });
        assert_eq!(result.series_key, None);
        assert_eq!(result.summary, None);
    }

    #[test]
    fn test_zero_previous_value_is_excluded_in_relative_mode() {
        let values = [(1, 0.0), (2, 0.0), (3, 1.0), (4, 1.0), (5, 1.0)];
        let settings = AnalysisSettings {
            consecutive: 2,
            ..Default::default()
        };
        let result = analyze(&records(&values), &config(settings));
        assert!(result.is_complete());
        // Epochs 2 and 3 have no percentage; epochs 4 and 5 are 0% improvements.
        assert_eq!(result.plateaus.len(), 1);
        assert_eq!((result.plateaus[0].start_epoch, result.plateaus[0].end_epoch), (4, 5));
        assert_eq!(result.recent_improvement.as_ref().map(|r| r.window), Some(2));
    }

    #[test]
    fn test_recent_improvement_uses_last_window() {
        let values = [(1, 10.0), (2, 8.0), (3, 7.0), (4, 6.5)];
        let settings = AnalysisSettings {
            smoothing: 2,
            absolute: true,
            ..Default::default()
        };
        let result = analyze(&records(&values), &config(settings));
        let recent = result.recent_improvement.unwrap();
        assert_eq!(recent.window, 2);
        assert!((recent.mean - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let values: Vec<(u32, f64)> = (1..=50).map(|e| (e, 10.0 / e as f64)).collect();
        let records = records(&values);
        let config = config(AnalysisSettings::default());
        let first = analyze(&records, &config);
        let second = analyze(&records, &config);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
