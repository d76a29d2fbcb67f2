//! Type definitions specific to the analyzer module.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Prefix applied to every metric taken from a `[valid]` group.
pub const VALID_PREFIX: &str = "valid_";

/// Metrics reported for a single epoch-summary line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: u32,
    /// Train-side names as written, validation-side names with a `valid_` prefix.
    pub metrics: BTreeMap<String, f64>,
    /// Timestamp taken from the line prefix, if one was present.
    pub logged_at: Option<NaiveDateTime>,
    /// Wall-clock duration of the epoch taken from the `time=` token.
    pub train_time_seconds: Option<f64>,
}

impl EpochRecord {
    pub fn new(epoch: u32) -> Self {
        Self {
            epoch,
            metrics: BTreeMap::new(),
            logged_at: None,
            train_time_seconds: None,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Why a line was skipped or a record replaced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WarningKind {
    #[error("epoch summary without an epoch number")]
    MissingEpochNumber,
    #[error("epoch number '{0}' is not a positive integer")]
    InvalidEpochNumber(String),
    #[error("value '{value}' of '{name}' is not a number")]
    InvalidValue { name: String, value: String },
    #[error("epoch {0} summary carries no metrics")]
    NoMetrics(u32),
    #[error("epoch {epoch} follows epoch {previous}; {discarded} earlier record(s) replaced")]
    EpochRewound { epoch: u32, previous: u32, discarded: usize },
    #[error("{0} line(s) contained undecodable bytes")]
    UndecodableBytes(usize),
}

/// Non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    /// Name of the file the line came from, if known.
    pub source: Option<String>,
    /// 1-based line number (0 for file-level warnings).
    pub line_number: usize,
    pub kind: WarningKind,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.source, self.line_number) {
            (Some(source), 0) => write!(f, "{}: {}", source, self.kind),
            (Some(source), line) => write!(f, "{}:{}: {}", source, line, self.kind),
            (None, 0) => write!(f, "{}", self.kind),
            (None, line) => write!(f, "line {}: {}", line, self.kind),
        }
    }
}

/// Outcome of classifying one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Epoch(EpochRecord),
    /// The line looks like an epoch summary but could not be used.
    Malformed(WarningKind),
    /// Anything else: progress output, INFO noise, truncated lines.
    Noise,
}

/// Ordered epoch records plus the warnings collected while producing them.
///
/// Epochs are strictly increasing. Pushing an epoch that is not greater than
/// the last one is treated as a resumed run: the superseded tail is dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLog {
    pub records: Vec<EpochRecord>,
    pub warnings: Vec<ParseWarning>,
    /// Source and line number of each entry in `records`.
    origins: Vec<RecordOrigin>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct RecordOrigin {
    source: Option<String>,
    line_number: usize,
}

impl ParsedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, applying the resume policy.
    pub fn push_record(&mut self, record: EpochRecord, source: Option<&str>, line_number: usize) {
        if let Some(previous) = self.records.last().map(|r| r.epoch) {
            if record.epoch <= previous {
                let keep = self.records.partition_point(|r| r.epoch < record.epoch);
                let discarded = self.records.len() - keep;
                self.records.truncate(keep);
                self.origins.truncate(keep);
                self.warnings.push(ParseWarning {
                    source: source.map(str::to_string),
                    line_number,
                    kind: WarningKind::EpochRewound {
                        epoch: record.epoch,
                        previous,
                        discarded,
                    },
                });
            }
        }
        self.records.push(record);
        self.origins.push(RecordOrigin {
            source: source.map(str::to_string),
            line_number,
        });
    }

    pub fn push_warning(&mut self, source: Option<&str>, line_number: usize, kind: WarningKind) {
        self.warnings.push(ParseWarning {
            source: source.map(str::to_string),
            line_number,
            kind,
        });
    }

    /// Concatenate another log after this one.
    ///
    /// Records of `other` go through the resume policy again, so an epoch that
    /// rewinds past this log's tail is reported against the line that caused it.
    /// `other` is expected to hold a single source: its warnings and the new
    /// rewind warnings are ordered by line, file-level warnings last.
    pub fn merge(&mut self, other: ParsedLog) {
        let ParsedLog {
            records,
            warnings,
            mut origins,
        } = other;
        origins.resize(records.len(), RecordOrigin::default());

        let before = self.warnings.len();
        for (record, origin) in records.into_iter().zip(origins) {
            self.push_record(record, origin.source.as_deref(), origin.line_number);
        }
        self.warnings.extend(warnings);
        self.warnings[before..].sort_by_key(|w| (w.line_number == 0, w.line_number));
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
