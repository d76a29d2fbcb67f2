//! Plateau detection over a sequence of improvement points.

use serde::Serialize;
use std::num::NonZeroUsize;

use super::series::{ImprovementMode, ImprovementPoint};

/// A maximal run of improvements below the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateauRegion {
    pub start_epoch: u32,
    pub end_epoch: u32,
    /// Number of improvement points in the run.
    pub length: usize,
    /// Mean improvement over the run, in the unit of the detection mode.
    pub avg_improvement: f64,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start_epoch: u32,
    end_epoch: u32,
    length: usize,
    sum: f64,
}

/// Accumulator folded over `(epoch, improvement)` pairs.
#[derive(Debug, Clone)]
struct PlateauScan {
    threshold: f64,
    consecutive: usize,
    run: Option<Run>,
    regions: Vec<PlateauRegion>,
}

impl PlateauScan {
    fn new(threshold: f64, consecutive: NonZeroUsize) -> Self {
        Self {
            threshold,
            consecutive: consecutive.get(),
            run: None,
            regions: Vec::new(),
        }
    }

    fn step(mut self, (epoch, improvement): (u32, f64)) -> Self {
        if improvement < self.threshold {
            self.run = Some(match self.run {
                Some(run) => Run {
                    end_epoch: epoch,
                    length: run.length + 1,
                    sum: run.sum + improvement,
                    ..run
                },
                None => Run {
                    start_epoch: epoch,
                    end_epoch: epoch,
                    length: 1,
                    sum: improvement,
                },
            });
        } else {
            self.close_run();
        }
        self
    }

    fn close_run(&mut self) {
        if let Some(run) = self.run.take() {
            if run.length >= self.consecutive {
                self.regions.push(PlateauRegion {
                    start_epoch: run.start_epoch,
                    end_epoch: run.end_epoch,
                    length: run.length,
                    avg_improvement: run.sum / run.length as f64,
                });
            }
        }
    }

    fn finish(mut self) -> Vec<PlateauRegion> {
        self.close_run();
        self.regions
    }
}

/// Find runs of at least `consecutive` improvements strictly below `threshold`.
///
/// Regressions (negative improvement) count as below the threshold. Runs are
/// counted over series positions, so a gap in epoch numbers does not break
/// one. In relative mode, points without a percentage (previous value zero)
/// are skipped: they neither extend nor break a run.
pub fn detect_plateaus(
    points: &[ImprovementPoint],
    mode: ImprovementMode,
    threshold: f64,
    consecutive: NonZeroUsize,
) -> Vec<PlateauRegion> {
    points
        .iter()
        .filter_map(|point| point.value(mode).map(|value| (point.epoch, value)))
        .fold(PlateauScan::new(threshold, consecutive), PlateauScan::step)
        .finish()
}
