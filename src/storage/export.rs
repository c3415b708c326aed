use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone};
use thiserror::Error;

use crate::types::{Session, Timestamp};

const REPORT_TITLE: &str = "=== INFORME DE DETECCIONES ===";
const INCLUDED_PREFIX: &str = "Animales incluidos: ";
const CLASS_PREFIX: &str = "Animal: ";
const TIME_PREFIX: &str = "Hora: ";
const DURATION_PREFIX: &str = "Duración: ";
const DURATION_SUFFIX: &str = " segundos";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no sessions match the selected classes")]
    NoSessions,
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: expected '{expected}'")]
    Expected { line: usize, expected: &'static str },
    #[error("line {line}: invalid timestamp '{value}'")]
    Time { line: usize, value: String },
    #[error("line {line}: invalid duration '{value}'")]
    Duration { line: usize, value: String },
}

/// One session block as read back from an exported report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub class: String,
    pub time: Timestamp,
    pub duration_secs: f64,
}

pub fn render_report(sessions: &[Session], included: &[String]) -> String {
    let mut out = String::new();
    out.push_str(REPORT_TITLE);
    out.push_str("\n\n");
    out.push_str(INCLUDED_PREFIX);
    out.push_str(&included.join(", "));
    out.push_str("\n\n");

    for session in sessions {
        out.push_str(&format!("{}{}\n", CLASS_PREFIX, session.class));
        out.push_str(&format!(
            "{}{}\n",
            TIME_PREFIX,
            session.end.format(TIME_FORMAT)
        ));
        out.push_str(&format!(
            "{}{:.2}{}\n",
            DURATION_PREFIX,
            session.duration_secs(),
            DURATION_SUFFIX
        ));
        out.push_str(&"-".repeat(40));
        out.push('\n');
    }

    out
}

/// Writes the sessions of the `included` classes to `path`.
///
/// The report is written next to the destination and renamed into place, so
/// a failed export leaves no partial file behind. Returns the number of
/// sessions written.
pub fn export_report(
    sessions: &[Session],
    included: &[String],
    path: &Path,
) -> Result<usize, ExportError> {
    let selected: Vec<Session> = sessions
        .iter()
        .filter(|s| included.contains(&s.class))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(ExportError::NoSessions);
    }

    let contents = render_report(&selected, included);
    let temp_path = temp_path_for(path);

    let written = std::fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| std::fs::rename(&temp_path, path)) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::info!(
        path = %path.display(),
        sessions = selected.len(),
        "report exported"
    );
    Ok(selected.len())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn parse_report(text: &str) -> Result<Vec<ReportEntry>, ParseError> {
    let mut entries = Vec::new();
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    while let Some((line, content)) = lines.next() {
        let Some(class) = content.strip_prefix(CLASS_PREFIX) else {
            continue;
        };

        let (line, time_line) = lines.next().ok_or(ParseError::Expected {
            line: line + 1,
            expected: TIME_PREFIX,
        })?;
        let value = time_line.strip_prefix(TIME_PREFIX).ok_or(ParseError::Expected {
            line,
            expected: TIME_PREFIX,
        })?;
        let time = NaiveDateTime::parse_from_str(value, TIME_FORMAT)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .ok_or_else(|| ParseError::Time {
                line,
                value: value.to_string(),
            })?;

        let (line, duration_line) = lines.next().ok_or(ParseError::Expected {
            line: line + 1,
            expected: DURATION_PREFIX,
        })?;
        let value = duration_line
            .strip_prefix(DURATION_PREFIX)
            .and_then(|v| v.strip_suffix(DURATION_SUFFIX))
            .ok_or(ParseError::Expected {
                line,
                expected: DURATION_PREFIX,
            })?;
        let duration_secs = value.parse::<f64>().map_err(|_| ParseError::Duration {
            line,
            value: value.to_string(),
        })?;

        entries.push(ReportEntry {
            class: class.to_string(),
            time,
            duration_secs,
        });
    }

    Ok(entries)
}
