//! Structural validation of a serialized event log
//!
//! A log file is valid when every non-empty line parses as an [`Event`],
//! required fields are present, event ids are strictly increasing, and
//! timestamps never go backwards. Used both for the round-trip check after
//! staging a write and for the full check exposed as `EventStore::validate`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::types::Event;

/// Result of a full structural check of a log file
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// True when every check passed
    pub valid: bool,
    /// Number of well-formed events found
    pub event_count: usize,
    /// Highest event id seen (0 for an empty log)
    pub last_event_id: u64,
    /// Human-readable description of each problem, with line numbers
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn empty() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }
}

/// Validate a serialized log file without mutating it.
///
/// A missing file is a valid empty log. I/O failures surface as errors;
/// structural problems are reported through the returned report.
pub fn validate_log_file(path: &Path) -> io::Result<ValidationReport> {
    if !path.exists() {
        return Ok(ValidationReport::empty());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut report = ValidationReport::empty();
    let mut last_id = 0u64;
    let mut last_ts = i64::MIN;

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match Event::from_json_line(&line) {
            Ok(event) => event,
            Err(e) => {
                report
                    .errors
                    .push(format!("line {}: malformed event: {}", line_num + 1, e));
                continue;
            }
        };

        if event.event_type.trim().is_empty() {
            report
                .errors
                .push(format!("line {}: empty event type", line_num + 1));
        }
        if event.event_id <= last_id {
            report.errors.push(format!(
                "line {}: event id {} not greater than previous id {}",
                line_num + 1,
                event.event_id,
                last_id
            ));
        }
        if event.timestamp < last_ts {
            report.errors.push(format!(
                "line {}: timestamp {} goes backwards (previous {})",
                line_num + 1,
                event.timestamp,
                last_ts
            ));
        }

        last_id = last_id.max(event.event_id);
        last_ts = last_ts.max(event.timestamp);
        report.event_count += 1;
    }

    report.last_event_id = last_id;
    report.valid = report.errors.is_empty();
    Ok(report)
}
