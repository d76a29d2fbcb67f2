//! File I/O for reading training logs.
//!
//! Lines are read as raw bytes and decoded lossily: bytes that are not valid
//! UTF-8 are dropped as noise instead of failing the whole file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::log_parser::parse_line_into;
use super::types::{ParsedLog, WarningKind};

/// Buffer size for reading log files (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// A log file that could not be read.
#[derive(Debug, Error)]
#[error("Failed to read log file {}: {source}", .path.display())]
pub struct LoadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Line reader over a single log file.
pub struct LogLoader {
    reader: BufReader<File>,
    path: PathBuf,
    line_buffer: Vec<u8>,
    undecodable_lines: usize,
}

impl LogLoader {
    /// Open a log file for reading.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|source| LoadError {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, file),
            path: path.to_path_buf(),
            line_buffer: Vec::with_capacity(512),
            undecodable_lines: 0,
        })
    }

    /// Read the next line, without its line terminator.
    ///
    /// # Returns
    ///
    /// `Ok(Some(line))` while lines remain, `Ok(None)` at EOF.
    pub fn next_line(&mut self) -> Result<Option<String>, LoadError> {
        self.line_buffer.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line_buffer)
            .map_err(|source| LoadError {
                path: self.path.clone(),
                source,
            })?;
        if read == 0 {
            return Ok(None);
        }

        let line = match std::str::from_utf8(&self.line_buffer) {
            Ok(text) => text.to_string(),
            Err(_) => {
                self.undecodable_lines += 1;
                String::from_utf8_lossy(&self.line_buffer).replace(char::REPLACEMENT_CHARACTER, "")
            }
        };
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    /// Number of lines read so far that contained undecodable bytes.
    pub fn undecodable_lines(&self) -> usize {
        self.undecodable_lines
    }

    /// Read the remaining lines and parse them one at a time.
    pub fn parse(mut self) -> Result<ParsedLog, LoadError> {
        let source = self.path.display().to_string();
        let mut log = ParsedLog::new();
        let mut line_count = 0;
        while let Some(line) = self.next_line()? {
            line_count += 1;
            parse_line_into(&mut log, &line, Some(source.as_str()), line_count);
        }

        if self.undecodable_lines > 0 {
            log::warn!("{}: skipped undecodable bytes in {} line(s)", source, self.undecodable_lines);
            log.push_warning(Some(source.as_str()), 0, WarningKind::UndecodableBytes(self.undecodable_lines));
        }
        log::info!("{}: {} epoch record(s), {} line(s)", source, log.records.len(), line_count);
        Ok(log)
    }
}

/// Result of loading several log files.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Records of every readable file, concatenated in caller order.
    pub log: ParsedLog,
    /// Files that could not be read.
    pub failures: Vec<LoadError>,
}

/// Parse log files in the given order.
///
/// A file that cannot be opened or read is reported in `failures` and the
/// remaining files are still parsed.
pub fn load_logs<P: AsRef<Path>>(paths: &[P]) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();
    for path in paths {
        match LogLoader::open(path.as_ref()).and_then(LogLoader::parse) {
            Ok(log) => outcome.log.merge(log),
            Err(e) => {
                log::error!("{}", e);
                outcome.failures.push(e);
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_log(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_reads_lines_without_terminators() {
        let file = write_log(b"first\r\nsecond\nthird");
        let mut loader = LogLoader::open(file.path()).unwrap();
        assert_eq!(loader.next_line().unwrap().as_deref(), Some("first"));
        assert_eq!(loader.next_line().unwrap().as_deref(), Some("second"));
        assert_eq!(loader.next_line().unwrap().as_deref(), Some("third"));
        assert_eq!(loader.next_line().unwrap(), None);
        assert_eq!(loader.undecodable_lines(), 0);
    }

    #[test]
    fn test_undecodable_bytes_are_dropped() {
        let mut contents = b"INFO: 1epoch results: [train] loss=2.0 [valid] lo".to_vec();
        contents.extend_from_slice(&[0xff, 0xfe]);
        contents.extend_from_slice(b"ss=1.5\n");
        let file = write_log(&contents);

        let log = LogLoader::open(file.path()).unwrap().parse().unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].metric("valid_loss"), Some(1.5));
        assert_eq!(log.warnings.len(), 1);
        assert_eq!(log.warnings[0].kind, WarningKind::UndecodableBytes(1));
    }

    #[test]
    fn test_warnings_carry_file_and_line() {
        let file = write_log(
            b"INFO: starting\n1epoch results: [train] loss=2.0 [valid] loss=1.5\nINFO: 2epoch results: [train] loss=abc\n",
        );
        let source = file.path().display().to_string();

        let log = LogLoader::open(file.path()).unwrap().parse().unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.warnings.len(), 1);
        assert_eq!(log.warnings[0].source.as_deref(), Some(source.as_str()));
        assert_eq!(log.warnings[0].line_number, 3);
        assert!(matches!(log.warnings[0].kind, WarningKind::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_file_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.log");
        let second = dir.path().join("second.log");
        std::fs::write(&first, "1epoch results: [train] loss=3.0 [valid] loss=2.0\n").unwrap();
        std::fs::write(&second, "2epoch results: [train] loss=2.5 [valid] loss=1.8\n").unwrap();
        let missing = dir.path().join("missing.log");

        let outcome = load_logs(&[first, missing.clone(), second]);
        let epochs: Vec<u32> = outcome.log.records.iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![1, 2]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].path, missing);
    }

    #[test]
    fn test_single_file_parse_is_independent_of_others() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(&a, "1epoch results: [train] loss=3.0 [valid] loss=2.0\nepoch results: [train]\n").unwrap();
        std::fs::write(&b, "5epoch results: [train] loss=1.0 [valid] loss=0.9\n").unwrap();

        let alone = load_logs(&[a.clone()]).log;
        let together = load_logs(&[a, b]).log;
        assert_eq!(together.records[..alone.records.len()], alone.records[..]);
        assert_eq!(together.warnings, alone.warnings);
    }

    #[test]
    fn test_rewind_across_files_names_the_later_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        std::fs::write(
            &a,
            "1epoch results: [train] loss=3.0 [valid] loss=2.0\n2epoch results: [train] loss=2.5 [valid] loss=1.8\n",
        )
        .unwrap();
        std::fs::write(&b, "resuming from checkpoint\n2epoch results: [train] loss=2.4 [valid] loss=1.7\n").unwrap();

        let outcome = load_logs(&[a, b.clone()]);
        let epochs: Vec<u32> = outcome.log.records.iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![1, 2]);
        assert_eq!(outcome.log.records[1].metric("valid_loss"), Some(1.7));

        assert_eq!(outcome.log.warnings.len(), 1);
        let warning = &outcome.log.warnings[0];
        assert_eq!(warning.source, Some(b.display().to_string()));
        assert_eq!(warning.line_number, 2);
        assert_eq!(
            warning.kind,
            WarningKind::EpochRewound {
                epoch: 2,
                previous: 2,
                discarded: 1
            }
        );
    }
}
