//! PNG charts of loss curves and epoch-to-epoch improvement.
//!
//! Charts are drawn straight into an `RgbImage`: polylines, a frame, light
//! grid lines, a zero line and a dashed threshold line. No text is rendered.

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

use crate::analyzer::EpochRecord;
use crate::config::AnalysisConfig;
use crate::trend::{AnalysisResult, Series, rolling_mean, train_key};

use super::ReportError;

pub const LOSS_LINEAR_FILE: &str = "loss_linear.png";
pub const LOSS_LOG_FILE: &str = "loss_log.png";
pub const IMPROVEMENT_FILE: &str = "improvement.png";
pub const COMBINED_FILE: &str = "combined.png";

const CHART_SIZE: (u32, u32) = (1200, 600);
const COMBINED_SIZE: (u32, u32) = (1400, 1000);
const MARGIN: u32 = 40;
const DASH_LENGTH: i64 = 8;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([228, 228, 228]);
const ZERO_LINE: Rgb<u8> = Rgb([160, 160, 160]);
const TRAIN: Rgb<u8> = Rgb([31, 119, 180]);
const VALID: Rgb<u8> = Rgb([255, 127, 14]);
const RAW: Rgb<u8> = Rgb([170, 200, 230]);
const SMOOTHED: Rgb<u8> = Rgb([44, 160, 44]);
const THRESHOLD: Rgb<u8> = Rgb([214, 39, 40]);

type Curve = Vec<(f64, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Linear,
    Log,
}

impl Scale {
    fn apply(self, value: f64) -> Option<f64> {
        match self {
            Scale::Linear => value.is_finite().then_some(value),
            Scale::Log => (value > 0.0 && value.is_finite()).then(|| value.log10()),
        }
    }
}

/// Pixel rectangle a chart is drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Panel {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

impl Panel {
    fn inset(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x: (x + MARGIN) as i64,
            y: (y + MARGIN) as i64,
            width: width.saturating_sub(2 * MARGIN).max(2) as i64,
            height: height.saturating_sub(2 * MARGIN).max(2) as i64,
        }
    }

    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Series prepared for drawing.
struct ChartData {
    train: Curve,
    valid: Curve,
    improvement: Curve,
    smoothed: Curve,
    valid_trend: Curve,
    threshold: f64,
}

impl ChartData {
    fn build(records: &[EpochRecord], result: &AnalysisResult, config: &AnalysisConfig) -> Self {
        let curve = |key: Option<String>| -> Curve {
            key.map(|key| {
                Series::from_records(records, &key)
                    .points()
                    .iter()
                    .map(|p| (p.epoch as f64, p.value))
                    .collect()
            })
            .unwrap_or_default()
        };
        let train = curve(train_key(records, &config.metric));
        let valid = curve(result.series_key.clone());

        let improvement: Curve = result
            .series_key
            .as_deref()
            .map(|key| Series::from_records(records, key).improvements())
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.value(config.mode).map(|v| (p.epoch as f64, v)))
            .collect();
        let smoothed = smooth(&improvement, config.smoothing.get());

        // Same heuristic as the trend panel of the combined chart: up to 20 epochs, a fifth of the run.
        let window = if valid.len() > 5 { (valid.len() / 5).min(20) } else { 1 };
        let valid_trend = if window > 1 { smooth(&valid, window) } else { Vec::new() };

        Self {
            train,
            valid,
            improvement,
            smoothed,
            valid_trend,
            threshold: config.threshold,
        }
    }

    fn is_empty(&self) -> bool {
        self.train.is_empty() && self.valid.is_empty()
    }

    fn draw_losses(&self, image: &mut RgbImage, panel: Panel, scale: Scale) {
        let mut chart = Chart::new(image, panel, &[&self.train, &self.valid], &[], scale);
        chart.polyline(&self.train, TRAIN);
        chart.polyline(&self.valid, VALID);
    }

    fn draw_improvement(&self, image: &mut RgbImage, panel: Panel) {
        let mut chart = Chart::new(
            image,
            panel,
            &[&self.improvement, &self.smoothed],
            &[0.0, self.threshold],
            Scale::Linear,
        );
        chart.hline(0.0, ZERO_LINE, false);
        chart.hline(self.threshold, THRESHOLD, true);
        chart.polyline(&self.improvement, RAW);
        chart.polyline(&self.smoothed, SMOOTHED);
    }

    fn draw_valid_trend(&self, image: &mut RgbImage, panel: Panel) {
        let mut chart = Chart::new(image, panel, &[&self.valid], &[], Scale::Linear);
        chart.polyline(&self.valid, RAW);
        chart.polyline(&self.valid_trend, VALID);
    }
}

/// Trailing rolling mean of a curve, aligned to the last x of each window.
fn smooth(curve: &[(f64, f64)], window: usize) -> Curve {
    let values: Vec<f64> = curve.iter().map(|(_, y)| *y).collect();
    rolling_mean(&values, window)
        .into_iter()
        .zip(curve.iter().skip(window.saturating_sub(1)))
        .map(|(mean, (x, _))| (*x, mean))
        .collect()
}

/// A data-space to pixel-space mapping over one panel of an image.
struct Chart<'a> {
    image: &'a mut RgbImage,
    panel: Panel,
    x_range: (f64, f64),
    y_range: (f64, f64),
    scale: Scale,
}

impl<'a> Chart<'a> {
    /// Fit ranges to the curves (and extra y values), then draw the frame and grid.
    fn new(image: &'a mut RgbImage, panel: Panel, curves: &[&Curve], extra_y: &[f64], scale: Scale) -> Self {
        let xs = curves.iter().flat_map(|c| c.iter().map(|(x, _)| *x));
        let ys = curves
            .iter()
            .flat_map(|c| c.iter().map(|(_, y)| *y))
            .chain(extra_y.iter().copied())
            .filter_map(|y| scale.apply(y));

        let mut chart = Self {
            image,
            panel,
            x_range: padded_range(xs, 0.0),
            y_range: padded_range(ys, 0.05),
            scale,
        };
        chart.draw_frame();
        chart
    }

    fn to_pixel(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        let y = self.scale.apply(y)?;
        let (x_min, x_max) = self.x_range;
        let (y_min, y_max) = self.y_range;
        let fx = (x - x_min) / (x_max - x_min);
        let fy = (y - y_min) / (y_max - y_min);
        let px = self.panel.x + (fx * (self.panel.width - 1) as f64).round() as i64;
        let py = self.panel.y + self.panel.height - 1 - (fy * (self.panel.height - 1) as f64).round() as i64;
        Some((px, py))
    }

    fn draw_frame(&mut self) {
        let Panel { x, y, width, height } = self.panel;
        for i in 1..5 {
            let gx = x + width * i / 5;
            let gy = y + height * i / 5;
            self.segment((gx, y), (gx, y + height - 1), GRID);
            self.segment((x, gy), (x + width - 1, gy), GRID);
        }
        let (right, bottom) = (x + width - 1, y + height - 1);
        self.segment((x, y), (right, y), AXIS);
        self.segment((x, bottom), (right, bottom), AXIS);
        self.segment((x, y), (x, bottom), AXIS);
        self.segment((right, y), (right, bottom), AXIS);
    }

    /// Connect consecutive points; points the scale cannot show leave a gap.
    fn polyline(&mut self, curve: &[(f64, f64)], color: Rgb<u8>) {
        let mut previous = None;
        for &(x, y) in curve {
            let current = self.to_pixel(x, y);
            if let (Some(from), Some(to)) = (previous, current) {
                self.segment(from, to, color);
                self.segment((from.0, from.1 + 1), (to.0, to.1 + 1), color);
            } else if let Some(point) = current {
                self.plot(point.0, point.1, color);
            }
            previous = current;
        }
    }

    fn hline(&mut self, y: f64, color: Rgb<u8>, dashed: bool) {
        let Some((_, py)) = self.to_pixel(self.x_range.0, y) else {
            return;
        };
        for px in self.panel.x..self.panel.x + self.panel.width {
            if !dashed || ((px - self.panel.x) / DASH_LENGTH) % 2 == 0 {
                self.plot(px, py, color);
            }
        }
    }

    /// Bresenham line, clipped to the panel.
    fn segment(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.plot(x, y, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn plot(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if self.panel.contains(x, y) {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Min/max of the values, padded by a fraction of the span.
///
/// Empty input gives `(0, 1)`; a single value gets a unit-wide range.
fn padded_range(values: impl Iterator<Item = f64>, padding: f64) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if max - min <= f64::EPSILON * max.abs().max(1.0) {
        return (min - 0.5, max + 0.5);
    }
    let pad = (max - min) * padding;
    (min - pad, max + pad)
}

fn blank(size: (u32, u32)) -> RgbImage {
    RgbImage::from_pixel(size.0, size.1, BACKGROUND)
}

fn save(image: &RgbImage, path: PathBuf) -> Result<PathBuf, ReportError> {
    image.save(&path).map_err(|source| ReportError::Image {
        path: path.clone(),
        source,
    })?;
    log::debug!("Wrote {}", path.display());
    Ok(path)
}

/// Render the four chart files into `output_dir`.
///
/// Returns the written paths; nothing is written when neither a train nor a
/// validation series exists for the metric.
pub fn render_charts(
    records: &[EpochRecord],
    result: &AnalysisResult,
    config: &AnalysisConfig,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    let data = ChartData::build(records, result, config);
    if data.is_empty() {
        log::warn!("No '{}' values to plot", config.metric);
        return Ok(Vec::new());
    }

    let mut written = Vec::with_capacity(4);
    let full = Panel::inset(0, 0, CHART_SIZE.0, CHART_SIZE.1);

    let mut image = blank(CHART_SIZE);
    data.draw_losses(&mut image, full, Scale::Linear);
    written.push(save(&image, output_dir.join(LOSS_LINEAR_FILE))?);

    let mut image = blank(CHART_SIZE);
    data.draw_losses(&mut image, full, Scale::Log);
    written.push(save(&image, output_dir.join(LOSS_LOG_FILE))?);

    let mut image = blank(CHART_SIZE);
    data.draw_improvement(&mut image, full);
    written.push(save(&image, output_dir.join(IMPROVEMENT_FILE))?);

    let (w, h) = (COMBINED_SIZE.0 / 2, COMBINED_SIZE.1 / 2);
    let mut image = blank(COMBINED_SIZE);
    data.draw_losses(&mut image, Panel::inset(0, 0, w, h), Scale::Linear);
    data.draw_losses(&mut image, Panel::inset(w, 0, w, h), Scale::Log);
    data.draw_improvement(&mut image, Panel::inset(0, h, w, h));
    data.draw_valid_trend(&mut image, Panel::inset(w, h, w, h));
    written.push(save(&image, output_dir.join(COMBINED_FILE))?);

    Ok(written)
}
