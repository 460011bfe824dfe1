//! Append-only CSV store of document records.
//!
//! One row per (date, source_filename). The store loads existing keys at
//! open time and refuses to append a key twice, so re-running a batch over a
//! partly processed collection never duplicates rows. Writes go through an
//! async mutex, and each row is flushed before `write` returns.
//!
//! # Columns
//!
//! `date, source_filename, status, flags, chunk_count, failed_chunks,
//! synopsis, detail, key_notes, source_sha256`
//!
//! Flags and failed chunk indices are `;`-separated; key notes are
//! newline-separated within their quoted cell.
//!
//! A run killed mid-write can leave a torn last row. [`CsvStore::open`]
//! truncates it before appending, so the next row starts on a fresh line
//! and the torn document is simply processed again.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::{DocumentRecord, FinalSummary, RecordStatus, StatusFlag};

pub const COLUMNS: [&str; 10] = [
    "date",
    "source_filename",
    "status",
    "flags",
    "chunk_count",
    "failed_chunks",
    "synopsis",
    "detail",
    "key_notes",
    "source_sha256",
];

const LIST_SEPARATOR: &str = ";";
const NOTE_SEPARATOR: &str = "\n";

/// A row as it appears in the file.
#[derive(Debug, Deserialize)]
struct Row {
    date: String,
    source_filename: String,
    status: String,
    #[serde(default)]
    flags: String,
    #[serde(default)]
    chunk_count: usize,
    #[serde(default)]
    failed_chunks: String,
    #[serde(default)]
    synopsis: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    key_notes: String,
    #[serde(default)]
    source_sha256: String,
}

impl TryFrom<Row> for DocumentRecord {
    type Error = anyhow::Error;

    fn try_from(row: Row) -> Result<Self> {
        let date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
            .with_context(|| format!("bad date '{}'", row.date))?;
        let status: RecordStatus = row.status.parse().map_err(anyhow::Error::msg)?;
        let flags = split_list(&row.flags)
            .map(|f| f.parse::<StatusFlag>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()?;
        let failed_chunks = split_list(&row.failed_chunks)
            .map(|i| i.parse::<usize>().with_context(|| format!("bad chunk index '{}'", i)))
            .collect::<Result<Vec<_>>>()?;
        let key_notes = row
            .key_notes
            .split(NOTE_SEPARATOR)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();

        Ok(DocumentRecord {
            date,
            source_filename: row.source_filename,
            status,
            flags,
            chunk_count: row.chunk_count,
            failed_chunks,
            source_sha256: row.source_sha256,
            summary: FinalSummary {
                synopsis: row.synopsis,
                detail: row.detail,
                key_notes,
            },
        })
    }
}

fn split_list(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Cell values of a record, in [`COLUMNS`] order.
pub fn record_fields(record: &DocumentRecord) -> Vec<String> {
    vec![
        record.date.to_string(),
        record.source_filename.clone(),
        record.status.to_string(),
        record
            .flags
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        record.chunk_count.to_string(),
        record
            .failed_chunks
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        record.summary.synopsis.clone(),
        record.summary.detail.clone(),
        record.summary.key_notes.join(NOTE_SEPARATOR),
        record.source_sha256.clone(),
    ]
}

/// Records read from a summaries CSV, plus the count of rows skipped.
#[derive(Debug, Default)]
pub struct StoredRecords {
    pub records: Vec<DocumentRecord>,
    pub malformed: usize,
}

/// Read every well-formed record from a summaries CSV.
///
/// A missing file reads as empty. Malformed rows (for example a row cut
/// short by an interrupted run) are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<DocumentRecord>> {
    Ok(scan_records(path)?.records)
}

/// Like [`read_records`], also counting the malformed rows.
pub fn scan_records(path: &Path) -> Result<StoredRecords> {
    let mut stored = StoredRecords::default();
    if !path.exists() {
        return Ok(stored);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open summaries CSV: {}", path.display()))?;

    for (line, result) in reader.deserialize::<Row>().enumerate() {
        let parsed = result
            .map_err(anyhow::Error::from)
            .and_then(DocumentRecord::try_from);
        match parsed {
            Ok(record) => stored.records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    row = line + 1,
                    error = %e,
                    "skipping malformed summaries row"
                );
                stored.malformed += 1;
            }
        }
    }
    Ok(stored)
}

/// A file written completely ends with a row terminator outside any quoted
/// field. Quotes inside cells are doubled, so the quote count is even.
fn ends_cleanly(bytes: &[u8]) -> bool {
    bytes.ends_with(b"\n") && bytes.iter().filter(|b| **b == b'"').count() % 2 == 0
}

/// Cut an unterminated last row off the file. Returns the number of bytes
/// removed.
fn repair_torn_tail(path: &Path) -> Result<u64> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read summaries CSV: {}", path.display()))
        }
    };
    if bytes.is_empty() || ends_cleanly(&bytes) {
        return Ok(0);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());
    let mut row = csv::ByteRecord::new();
    let mut last_start = 0;
    loop {
        let start = reader.position().byte();
        match reader.read_byte_record(&mut row) {
            Ok(true) => last_start = start,
            Ok(false) => break,
            Err(_) => {
                last_start = start;
                break;
            }
        }
    }

    let removed = bytes.len() as u64 - last_start;
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(last_start))
        .with_context(|| format!("Failed to truncate summaries CSV: {}", path.display()))?;
    warn!(
        path = %path.display(),
        bytes = removed,
        "removed torn last row left by an interrupted run"
    );
    Ok(removed)
}

struct StoreState {
    keys: HashSet<(NaiveDate, String)>,
    writer: csv::Writer<File>,
}

/// The summaries table, opened for appending.
pub struct CsvStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl CsvStore {
    /// Open (or create) the store at `path`, loading the keys already present.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        repair_torn_tail(path)?;
        let existing = read_records(path)?;
        let keys = existing.iter().map(DocumentRecord::key).collect();
        let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open summaries CSV: {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(COLUMNS)?;
            writer.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(StoreState { keys, writer }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` unless its key is already stored. Returns whether a
    /// row was written.
    pub async fn write(&self, record: &DocumentRecord) -> Result<bool> {
        let mut state = self.state.lock().await;
        let key = record.key();
        if state.keys.contains(&key) {
            return Ok(false);
        }
        state.writer.write_record(record_fields(record))?;
        state.writer.flush()?;
        state.keys.insert(key);
        Ok(true)
    }

    pub async fn contains(&self, date: NaiveDate, source_filename: &str) -> bool {
        let state = self.state.lock().await;
        state.keys.contains(&(date, source_filename.to_string()))
    }

    pub async fn read_all(&self) -> Result<Vec<DocumentRecord>> {
        // Hold the lock so no row is half-written while reading.
        let _state = self.state.lock().await;
        read_records(&self.path)
    }
}
