//! GPS log format
//!
//! Logs are JSON Lines: one fix per line, each line parseable on its own.
//! A log cut short by a crash loses at most its last, partially written line.

use super::provider::PositionFix;
use crate::recorder::state::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Journal file extension
pub const JOURNAL_EXTENSION: &str = "gps.jsonl";

/// One logged fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsLogEntry {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
}

impl From<PositionFix> for GpsLogEntry {
    fn from(fix: PositionFix) -> Self {
        Self {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_meters: fix.accuracy_meters,
        }
    }
}

/// Completed log of one recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsLog {
    /// Session the fixes were captured for; `None` for a log from an idle sampler
    pub session_id: Option<SessionId>,
    pub entries: Vec<GpsLogEntry>,
}

impl GpsLog {
    pub fn empty() -> Self {
        Self {
            session_id: None,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.timestamp)
    }

    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        to_json_lines(&self.entries)
    }
}

/// Entries recovered from a JSON Lines log
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLog {
    pub entries: Vec<GpsLogEntry>,
    /// Lines that could not be parsed (torn writes, garbage)
    pub skipped_lines: usize,
}

/// Serialize entries, one `\n`-terminated JSON object per fix.
/// No entries yields an empty string.
pub fn to_json_lines(entries: &[GpsLogEntry]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a JSON Lines log, skipping blank and unparseable lines
pub fn parse_json_lines(content: &str) -> ParsedLog {
    let mut entries = Vec::new();
    let mut skipped_lines = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GpsLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable GPS log line: {}", e);
                skipped_lines += 1;
            }
        }
    }

    ParsedLog {
        entries,
        skipped_lines,
    }
}

/// Path of the journal for a session
pub fn journal_path(dir: &Path, session_id: SessionId) -> PathBuf {
    dir.join(format!("{session_id}.{JOURNAL_EXTENSION}"))
}

/// Read back a journal left by an interrupted session
pub fn recover_journal(path: &Path) -> std::io::Result<ParsedLog> {
    let content = fs::read_to_string(path)?;
    let parsed = parse_json_lines(&content);
    tracing::info!(
        "Recovered {} GPS fixes from {:?} ({} unreadable lines)",
        parsed.entries.len(),
        path,
        parsed.skipped_lines
    );
    Ok(parsed)
}

/// Append-only on-disk mirror of the in-memory log
pub struct GpsJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl GpsJournal {
    /// Create (or truncate) the journal for a session
    pub fn create(dir: &Path, session_id: SessionId) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = journal_path(dir, session_id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        tracing::debug!("Opened GPS journal {:?}", path);

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry and flush it to the OS
    pub fn append(&mut self, entry: &GpsLogEntry) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Close and delete the journal
    pub fn discard(self) -> std::io::Result<()> {
        let path = self.path;
        drop(self.writer);
        fs::remove_file(path)
    }
}
