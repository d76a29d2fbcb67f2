//! Recognize epoch-summary lines and extract structured `EpochRecord` data.
//!
//! Two shapes are accepted without any format flag:
//! - ESPnet: `12epoch results: [train] ... [valid] ...`
//! - spaced: `epoch 12 results: [train] ... [valid] ...`
//!
//! Metric names are never hardcoded; only the bracketed train/valid grouping
//! and the `name=value` token shape matter.

use chrono::{Duration, NaiveDateTime};

use super::types::{EpochRecord, LineOutcome, ParsedLog, VALID_PREFIX, WarningKind};

const RESULTS_MARKER: &str = "results:";
const EPOCH_WORD: &str = "epoch";
const TRAIN_GROUP: &str = "train";
const VALID_GROUP: &str = "valid";
const TIME_TOKEN: &str = "time";

/// Longest text accepted between `epoch` and `results:` in the spaced shape.
const MAX_EPOCH_FIELD_LEN: usize = 16;

/// Classify a single log line.
///
/// # Log Line Formats
///
/// ```text
/// GAN-style (VITS):
/// [gpu01] 2024-03-02 14:05:11,532 (trainer:338) INFO: 12epoch results: [train] iter_time=1.2e-04, generator_loss=47.11, generator_mel_loss=21.5, discriminator_loss=2.6, time=25 minutes and 17.14 seconds, total_count=1200, [valid] generator_loss=45.2, generator_mel_loss=20.1, discriminator_loss=2.7, total_count=120
///
/// Single-loss (FastSpeech2):
/// 2024-03-02 14:05:11 (trainer:338) INFO: epoch 5 results: [train] loss=1.23, l1_loss=0.61, duration_loss=0.08, pitch_loss=0.31, energy_loss=0.23 [valid] loss=1.31, l1_loss=0.66
/// ```
pub fn parse_log_line(line: &str) -> LineOutcome {
    let Some(marker) = line.find(RESULTS_MARKER) else {
        return LineOutcome::Noise;
    };
    let head = &line[..marker];
    let Some(epoch_pos) = head.rfind(EPOCH_WORD) else {
        return LineOutcome::Noise;
    };

    let epoch = match extract_epoch_number(head, epoch_pos) {
        Some(Ok(epoch)) => epoch,
        Some(Err(kind)) => return LineOutcome::Malformed(kind),
        None => return LineOutcome::Noise,
    };

    let mut record = EpochRecord::new(epoch);
    record.logged_at = parse_timestamp(&head[..epoch_pos]);

    let body = &line[marker + RESULTS_MARKER.len()..];
    for (group, content) in split_groups(body) {
        let valid = match group {
            Some(VALID_GROUP) => true,
            Some(TRAIN_GROUP) | None => false,
            Some(_) => continue,
        };
        for (name, value) in tokenize(content) {
            if name == TIME_TOKEN {
                if !valid {
                    match parse_duration(&value) {
                        Some(seconds) => record.train_time_seconds = Some(seconds),
                        None => return invalid_value(name, value),
                    }
                }
                continue;
            }
            let Ok(number) = value.parse::<f64>() else {
                return invalid_value(name, value);
            };
            record.metrics.insert(normalize_name(name, valid), number);
        }
    }

    if record.metrics.is_empty() {
        return LineOutcome::Malformed(WarningKind::NoMetrics(epoch));
    }
    LineOutcome::Epoch(record)
}

/// Parse a sequence of lines from one source, in order.
pub fn parse_lines<I, S>(lines: I, source: Option<&str>) -> ParsedLog
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut log = ParsedLog::new();
    for (index, line) in lines.into_iter().enumerate() {
        parse_line_into(&mut log, line.as_ref(), source, index + 1);
    }
    log
}

/// Classify one line and record its outcome in `log`.
pub fn parse_line_into(log: &mut ParsedLog, line: &str, source: Option<&str>, line_number: usize) {
    match parse_log_line(line) {
        LineOutcome::Epoch(record) => log.push_record(record, source, line_number),
        LineOutcome::Malformed(kind) => {
            log::debug!("Skipping malformed epoch summary at line {}: {}", line_number, kind);
            log.push_warning(source, line_number, kind);
        }
        LineOutcome::Noise => {}
    }
}

/// Prefix validation-side names with `valid_` unless already present.
pub fn normalize_name(name: &str, valid: bool) -> String {
    if valid && !name.starts_with(VALID_PREFIX) {
        format!("{}{}", VALID_PREFIX, name)
    } else {
        name.to_string()
    }
}

fn invalid_value(name: &str, value: String) -> LineOutcome {
    LineOutcome::Malformed(WarningKind::InvalidValue {
        name: name.to_string(),
        value,
    })
}

/// Extract the epoch number around the `epoch` word.
///
/// Returns `None` when the line only happens to contain both words and is not
/// shaped like a summary.
fn extract_epoch_number(head: &str, epoch_pos: usize) -> Option<Result<u32, WarningKind>> {
    let between = head[epoch_pos + EPOCH_WORD.len()..].trim();
    if between.len() > MAX_EPOCH_FIELD_LEN || between.contains(char::is_whitespace) {
        return None;
    }

    let digits = if between.is_empty() {
        // ESPnet shape: digits glued to the front of `epoch`
        let before = head[..epoch_pos].trim_end();
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i);
        match start {
            Some(start) => &before[start..],
            None => return Some(Err(WarningKind::MissingEpochNumber)),
        }
    } else {
        between
    };

    Some(match digits.parse::<u32>() {
        Ok(epoch) if epoch >= 1 => Ok(epoch),
        _ => Err(WarningKind::InvalidEpochNumber(digits.to_string())),
    })
}

/// Split the text after `results:` into bracketed groups.
///
/// Text before the first header is returned with a `None` group name.
fn split_groups(body: &str) -> Vec<(Option<&str>, &str)> {
    let mut headers = Vec::new();
    let mut search_from = 0;
    while let Some(offset) = body[search_from..].find('[') {
        let open = search_from + offset;
        let Some(close_offset) = body[open..].find(']') else {
            break;
        };
        let close = open + close_offset;
        let name = &body[open + 1..close];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            headers.push((open, close, name));
            search_from = close + 1;
        } else {
            search_from = open + 1;
        }
    }

    let mut groups = Vec::with_capacity(headers.len() + 1);
    let leading_end = headers.first().map(|(open, _, _)| *open).unwrap_or(body.len());
    groups.push((None, &body[..leading_end]));
    for (i, (_, close, name)) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map(|(open, _, _)| *open).unwrap_or(body.len());
        groups.push((Some(*name), &body[close + 1..end]));
    }
    groups
}

/// Split group content into `name=value` tokens.
///
/// Tokens are separated by commas and/or whitespace. Words without `=` are
/// appended to the previous value so multi-word values such as
/// `time=25 minutes and 17.14 seconds` survive intact.
fn tokenize(content: &str) -> Vec<(&str, String)> {
    let mut tokens: Vec<(&str, String)> = Vec::new();
    for word in content.split(|c: char| c == ',' || c.is_whitespace()).filter(|w| !w.is_empty()) {
        if let Some((name, value)) = word.split_once('=') {
            if !name.is_empty() {
                tokens.push((name, value.to_string()));
            }
        } else if let Some((_, value)) = tokens.last_mut() {
            if !value.is_empty() {
                value.push(' ');
            }
            value.push_str(word);
        }
    }
    tokens
}

/// Find the first `YYYY-MM-DD HH:MM:SS` timestamp in the prefix, with an
/// optional `,` or `.` fraction of any length (kept to millisecond precision).
fn parse_timestamp(prefix: &str) -> Option<NaiveDateTime> {
    const LEN: usize = 19;
    for (start, c) in prefix.char_indices() {
        if start + LEN > prefix.len() {
            break;
        }
        if !c.is_ascii_digit() {
            continue;
        }
        let Some(candidate) = prefix.get(start..start + LEN) else {
            continue;
        };
        let parsed = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(candidate, "%Y-%m-%dT%H:%M:%S"));
        if let Ok(timestamp) = parsed {
            let millis = prefix
                .get(start + LEN..)
                .and_then(|rest| rest.strip_prefix([',', '.']))
                .map(fraction_millis)
                .unwrap_or(0);
            return Some(timestamp + Duration::milliseconds(millis));
        }
    }
    None
}

/// Milliseconds from the leading digits of a seconds fraction: `5` is 500, `53` is 530.
fn fraction_millis(fraction: &str) -> i64 {
    let digits = fraction.bytes().take_while(u8::is_ascii_digit);
    digits
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0, |millis, digit| millis * 10 + i64::from(digit - b'0'))
}

/// Convert `"1 hour 25 minutes and 17.14 seconds"` (or a bare number) to seconds.
pub fn parse_duration(text: &str) -> Option<f64> {
    if let Ok(seconds) = text.trim().parse::<f64>() {
        return Some(seconds);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut total = 0.0;
    let mut matched = false;
    for pair in words.windows(2) {
        let Ok(amount) = pair[0].parse::<f64>() else {
            continue;
        };
        let unit_seconds = match pair[1].trim_end_matches(',') {
            "week" | "weeks" => 7.0 * 24.0 * 3600.0,
            "day" | "days" => 24.0 * 3600.0,
            "hour" | "hours" => 3600.0,
            "minute" | "minutes" => 60.0,
            "second" | "seconds" => 1.0,
            _ => continue,
        };
        total += amount * unit_seconds;
        matched = true;
    }
    matched.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const VITS_LINE: &str = "[gpu01] 2024-03-02 14:05:11,532 (trainer:338) INFO: 12epoch results: [train] iter_time=1.2e-04, generator_loss=47.114, generator_mel_loss=21.5, discriminator_loss=2.6, time=25 minutes and 17.14 seconds, total_count=1200, [valid] generator_loss=45.2, generator_mel_loss=20.1, discriminator_loss=2.7, total_count=120";

    const FASTSPEECH_LINE: &str = "2024-03-02 14:05:11 (trainer:338) INFO: epoch 5 results: [train] loss=1.23 l1_loss=0.61 pitch_loss=0.31 energy_loss=0.23 [valid] loss=1.31 valid_l1_loss=0.66";

    fn expect_record(line: &str) -> EpochRecord {
        match parse_log_line(line) {
            LineOutcome::Epoch(record) => record,
            other => panic!("Expected epoch record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_gan_variant() {
        let record = expect_record(VITS_LINE);
        assert_eq!(record.epoch, 12);
        assert_eq!(record.metric("generator_loss"), Some(47.114));
        assert_eq!(record.metric("iter_time"), Some(1.2e-4));
        assert_eq!(record.metric("discriminator_loss"), Some(2.6));
        assert_eq!(record.metric("valid_generator_loss"), Some(45.2));
        assert_eq!(record.metric("valid_generator_mel_loss"), Some(20.1));
        assert_eq!(record.metric("valid_total_count"), Some(120.0));
        assert_eq!(record.metrics.len(), 9);
        assert!(!record.metrics.contains_key("time"));

        let seconds = record.train_time_seconds.unwrap();
        assert!((seconds - (25.0 * 60.0 + 17.14)).abs() < 1e-9);

        let logged_at = record.logged_at.unwrap();
        assert_eq!(logged_at.hour(), 14);
        assert_eq!(logged_at.nanosecond(), 532_000_000);
    }

    #[test]
    fn test_parse_single_loss_variant() {
        let record = expect_record(FASTSPEECH_LINE);
        assert_eq!(record.epoch, 5);
        assert_eq!(record.metric("loss"), Some(1.23));
        assert_eq!(record.metric("pitch_loss"), Some(0.31));
        assert_eq!(record.metric("valid_loss"), Some(1.31));
        // Already prefixed names are not prefixed twice.
        assert_eq!(record.metric("valid_l1_loss"), Some(0.66));
        assert!(!record.metrics.contains_key("valid_valid_l1_loss"));
        assert_eq!(record.train_time_seconds, None);
    }

    #[test]
    fn test_extracts_exactly_the_tokens_present() {
        let record = expect_record("1epoch results: [train] a_loss=1.5, b_loss=2 [valid] a_loss=3e1");
        let triples: Vec<(String, f64)> = record.metrics.into_iter().collect();
        assert_eq!(
            triples,
            vec![
                ("a_loss".to_string(), 1.5),
                ("b_loss".to_string(), 2.0),
                ("valid_a_loss".to_string(), 30.0),
            ]
        );
    }

    #[test]
    fn test_other_groups_are_ignored() {
        let record = expect_record("3epoch results: [train] loss=1.0, [valid] loss=2.0, [att_plot] time=2.1 seconds, total_count=4");
        assert_eq!(record.metrics.len(), 2);
        assert_eq!(record.metric("valid_loss"), Some(2.0));
    }

    #[test]
    fn test_missing_epoch_number_is_malformed() {
        let outcome = parse_log_line("epoch results: [train] generator_loss=nan [valid]");
        assert_eq!(outcome, LineOutcome::Malformed(WarningKind::MissingEpochNumber));
    }

    #[test]
    fn test_invalid_epoch_number_is_malformed() {
        assert_eq!(
            parse_log_line("INFO: epoch x7 results: [train] loss=1.0"),
            LineOutcome::Malformed(WarningKind::InvalidEpochNumber("x7".to_string()))
        );
        assert_eq!(
            parse_log_line("INFO: 0epoch results: [train] loss=1.0"),
            LineOutcome::Malformed(WarningKind::InvalidEpochNumber("0".to_string()))
        );
    }

    #[test]
    fn test_invalid_value_drops_line() {
        assert_eq!(
            parse_log_line("4epoch results: [train] loss=1.0, mel_loss=abc [valid] loss=2.0"),
            LineOutcome::Malformed(WarningKind::InvalidValue {
                name: "mel_loss".to_string(),
                value: "abc".to_string(),
            })
        );
    }

    #[test]
    fn test_summary_without_metrics() {
        assert_eq!(
            parse_log_line("INFO: 9epoch results: [train] [valid]"),
            LineOutcome::Malformed(WarningKind::NoMetrics(9))
        );
    }

    #[test]
    fn test_noise_lines() {
        assert_eq!(parse_log_line("This is not a valid log line"), LineOutcome::Noise);
        assert_eq!(
            parse_log_line("2024-03-02 14:05:11 (trainer:338) INFO: 12epoch:train:1-100batch: iter_time=1.2e-04, loss=3.1"),
            LineOutcome::Noise
        );
        assert_eq!(
            parse_log_line("INFO: The best model has been updated: valid.loss results: none"),
            LineOutcome::Noise
        );
        assert_eq!(
            parse_log_line("INFO: epoch checkpoint saved, averaging results: done"),
            LineOutcome::Noise
        );
    }

    #[test]
    fn test_parse_lines_collects_warnings() {
        let lines = [
            "2024-03-02 14:00:00 INFO: 1epoch results: [train] generator_loss=50.0 [valid] generator_loss=47.114",
            "2024-03-02 14:00:01 INFO: 1epoch:train:1-100batch: iter_time=1.2e-04",
            "epoch results: [train] generator_loss=nan [valid]",
            "2024-03-02 14:30:00 INFO: 2epoch results: [train] generator_loss=44.0 [valid] generator_loss=40.0",
        ];
        let log = parse_lines(lines, Some("train.log"));

        let epochs: Vec<u32> = log.records.iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![1, 2]);
        assert_eq!(log.warnings.len(), 1);
        assert_eq!(log.warnings[0].line_number, 3);
        assert_eq!(log.warnings[0].kind, WarningKind::MissingEpochNumber);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("17.5"), Some(17.5));
        assert_eq!(parse_duration("2 hours, 1 minute and 3 seconds"), Some(7263.0));
        assert_eq!(parse_duration("1 week 1 day"), Some(8.0 * 24.0 * 3600.0));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_timestamp_fraction_of_any_length() {
        let millis = |prefix: &str| parse_timestamp(prefix).map(|t| t.nanosecond() / 1_000_000);
        assert_eq!(millis("[gpu01] 2024-03-02 14:05:11,5 (trainer:338) INFO: "), Some(500));
        assert_eq!(millis("2024-03-02 14:05:11,53) INFO: "), Some(530));
        assert_eq!(millis("2024-03-02 14:05:11.532917 INFO: "), Some(532));
        assert_eq!(millis("2024-03-02T14:05:11 INFO: "), Some(0));
        assert_eq!(millis("INFO: "), None);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("mel_loss", true), "valid_mel_loss");
        assert_eq!(normalize_name("valid_mel_loss", true), "valid_mel_loss");
        assert_eq!(normalize_name("mel_loss", false), "mel_loss");
    }
}
