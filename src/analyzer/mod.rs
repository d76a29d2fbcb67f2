//! Analyzer module for training-log parsing.
//!
//! Provides functionality for:
//! - Recognizing epoch-summary lines in both ESPnet log shapes
//! - Reading one or more log files in caller order, tolerating unreadable files
//!
//! Parsing never fails on log content; problems are returned as warnings.

pub mod log_loader;
pub mod log_parser;
pub mod types;

pub use log_loader::{LoadError, LoadOutcome, LogLoader, load_logs};
pub use log_parser::{parse_line_into, parse_lines, parse_log_line};
pub use types::{EpochRecord, LineOutcome, ParseWarning, ParsedLog, WarningKind};
