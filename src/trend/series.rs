//! Per-metric views over the epoch records.

use serde::Serialize;

use crate::analyzer::EpochRecord;
use crate::analyzer::types::VALID_PREFIX;

/// How improvement values are compared against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementMode {
    /// Percentage of the previous value.
    #[default]
    Relative,
    /// Raw difference in loss units.
    Absolute,
}

impl ImprovementMode {
    pub fn unit(&self) -> &'static str {
        match self {
            ImprovementMode::Relative => "%",
            ImprovementMode::Absolute => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub epoch: u32,
    pub value: f64,
}

/// Epoch-to-epoch change between two adjacent series points.
///
/// Positive values mean the loss went down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImprovementPoint {
    /// Epoch of the later point.
    pub epoch: u32,
    /// `previous - current`.
    pub delta: f64,
    /// `100 * delta / |previous|`, absent when the previous value is zero.
    pub delta_pct: Option<f64>,
}

impl ImprovementPoint {
    /// Value used for threshold comparison in the given mode.
    pub fn value(&self, mode: ImprovementMode) -> Option<f64> {
        match mode {
            ImprovementMode::Relative => self.delta_pct,
            ImprovementMode::Absolute => Some(self.delta),
        }
    }
}

/// Ordered `(epoch, value)` pairs of one metric.
///
/// Epochs where the metric is missing or not finite are left out, not interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    key: String,
    points: Vec<SeriesPoint>,
}

impl Series {
    pub fn from_records(records: &[EpochRecord], key: &str) -> Self {
        let points = records
            .iter()
            .filter_map(|record| {
                record
                    .metric(key)
                    .filter(|value| value.is_finite())
                    .map(|value| SeriesPoint { epoch: record.epoch, value })
            })
            .collect();
        Self {
            key: key.to_string(),
            points,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Changes between adjacent points, in series order.
    pub fn improvements(&self) -> Vec<ImprovementPoint> {
        self.points
            .windows(2)
            .map(|pair| {
                let (prev, curr) = (pair[0].value, pair[1].value);
                let delta = prev - curr;
                ImprovementPoint {
                    epoch: pair[1].epoch,
                    delta,
                    delta_pct: (prev != 0.0).then(|| 100.0 * delta / prev.abs()),
                }
            })
            .collect()
    }
}

/// Resolve the validation-side key for a metric family.
///
/// `mel_loss` matches `valid_mel_loss` first, then `valid_generator_mel_loss`
/// as written by GAN-style recipes. Names already starting with `valid_` are
/// looked up as given.
pub fn validation_key(records: &[EpochRecord], metric: &str) -> Option<String> {
    let candidates = if metric.starts_with(VALID_PREFIX) {
        vec![metric.to_string()]
    } else {
        let base = metric.strip_prefix("train_").unwrap_or(metric);
        let mut keys = vec![format!("{}{}", VALID_PREFIX, base)];
        if !base.starts_with("generator_") && !base.starts_with("discriminator_") {
            keys.push(format!("{}generator_{}", VALID_PREFIX, base));
        }
        keys
    };
    first_present(records, candidates)
}

/// Resolve the train-side key for a metric family.
pub fn train_key(records: &[EpochRecord], metric: &str) -> Option<String> {
    let base = metric.strip_prefix(VALID_PREFIX).unwrap_or(metric);
    let base = base.strip_prefix("train_").unwrap_or(base);
    let mut candidates = vec![base.to_string(), format!("train_{}", base)];
    if !base.starts_with("generator_") && !base.starts_with("discriminator_") {
        candidates.push(format!("generator_{}", base));
    }
    first_present(records, candidates)
}

fn first_present(records: &[EpochRecord], candidates: Vec<String>) -> Option<String> {
    candidates
        .into_iter()
        .find(|key| records.iter().any(|record| record.metrics.contains_key(key)))
}

/// Trailing rolling mean; the output has `values.len() - window + 1` entries.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}
