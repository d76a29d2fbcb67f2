use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use espnet_log_analyzer::analyzer::load_logs;
use espnet_log_analyzer::config::{AnalysisSettings, ConfigError};
use espnet_log_analyzer::report::{EpochTable, SummaryReport, render_charts, write_json};
use espnet_log_analyzer::trend::{analyze, train_key};

/// Exit code for rejected configuration.
const CONFIG_ERROR_EXIT: u8 = 2;

/// ESPnet training log parser and plateau analyzer.
#[derive(Parser, Debug)]
#[command(
    name = "espnet-log-analyzer",
    version,
    about,
    after_help = "Examples:\n  espnet-log-analyzer train.log\n  espnet-log-analyzer train.log --output-dir ./graphs --threshold 0.05\n  espnet-log-analyzer train.1.log train.2.log --metric mel_loss --no-show"
)]
struct Cli {
    /// Training log file(s), concatenated in the given order
    #[arg(required = true)]
    log_files: Vec<PathBuf>,

    /// TOML settings file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to save charts and JSON exports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Metric family to analyze [default: generator_loss]
    #[arg(short, long)]
    metric: Option<String>,

    /// Improvement threshold for plateau detection, in % unless --absolute [default: 0.1]
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Consecutive epochs below threshold to confirm a plateau [default: 10]
    #[arg(short, long, allow_negative_numbers = true)]
    consecutive: Option<i64>,

    /// Window for the recent improvement rate and smoothed curve [default: 10]
    #[arg(short, long, allow_negative_numbers = true)]
    smoothing: Option<i64>,

    /// Use absolute improvement instead of relative percentage
    #[arg(long)]
    absolute: bool,

    /// Earliest epoch a stop suggestion may point at [default: 0]
    #[arg(long)]
    min_epochs: Option<u32>,

    /// Do not print the per-epoch table
    #[arg(long)]
    no_show: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Settings file (or defaults) with command-line overrides applied.
    fn settings(&self) -> Result<AnalysisSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => AnalysisSettings::load(path)?,
            None => AnalysisSettings::default(),
        };

        if let Some(metric) = &self.metric {
            settings.metric = metric.clone();
        }
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if let Some(consecutive) = self.consecutive {
            settings.consecutive = consecutive;
        }
        if let Some(smoothing) = self.smoothing {
            settings.smoothing = smoothing;
        }
        if let Some(min_epochs) = self.min_epochs {
            settings.min_epochs = min_epochs;
        }
        if let Some(output_dir) = &self.output_dir {
            settings.output_dir = Some(output_dir.clone());
        }
        settings.absolute |= self.absolute;
        settings.no_show |= self.no_show;
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging setup
    let own_level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("espnet_log_analyzer"), own_level)
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    // Configuration is checked before any log is touched.
    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Ok(ExitCode::from(CONFIG_ERROR_EXIT));
        }
    };
    let config = match settings.validate() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Ok(ExitCode::from(CONFIG_ERROR_EXIT));
        }
    };

    for path in &cli.log_files {
        info!("Parsing log file: {}", path.display());
    }
    let outcome = load_logs(&cli.log_files);
    for warning in &outcome.log.warnings {
        warn!("{}", warning);
    }
    if !outcome.failures.is_empty() {
        warn!(
            "{} of {} log file(s) could not be read",
            outcome.failures.len(),
            cli.log_files.len()
        );
    }

    let records = &outcome.log.records;
    if records.is_empty() {
        error!("No epoch data found in log file(s).");
        return Ok(ExitCode::FAILURE);
    }
    info!("Found {} epochs", records.len());

    let result = analyze(records, &config);
    println!("{}", SummaryReport { result: &result, records });

    if !settings.no_show {
        let train = train_key(records, &config.metric);
        println!(
            "{}",
            EpochTable {
                records,
                train_key: train.as_deref(),
                valid_key: result.series_key.as_deref(),
                mode: config.mode,
            }
        );
    }

    if let Some(output_dir) = &settings.output_dir {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
        write_json(output_dir, records, &outcome.log.warnings, &result)?;
        let charts = render_charts(records, &result, &config, output_dir)?;
        info!("{} chart(s) and JSON exports saved to: {}", charts.len(), output_dir.display());
    }

    Ok(ExitCode::SUCCESS)
}
