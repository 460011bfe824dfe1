//! Core data models used throughout archivist.
//!
//! These types represent the source documents, chunks, partial and final
//! summaries, persisted records, and attendance rows that flow through the
//! summarization and join pipeline.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A meeting document as produced by the extraction step.
///
/// Immutable once extracted. `valid` is false when the file could not be
/// read or yielded no usable text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub date: NaiveDate,
    pub source_filename: String,
    pub path: PathBuf,
    pub text: String,
    pub valid: bool,
}

impl SourceDocument {
    /// Stable identifier used in chunk metadata and log fields.
    pub fn document_id(&self) -> String {
        format!("{}/{}", self.date, self.source_filename)
    }
}

/// A token-bounded slice of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub total_count: usize,
    pub text: String,
}

/// The summarizer's structured output for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialSummary {
    pub index: usize,
    pub synopsis: String,
    pub detail: String,
    pub key_notes: Vec<String>,
    /// Passages the model flagged as unclear or incomplete.
    pub unclear: Vec<String>,
}

/// The merged, document-level summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FinalSummary {
    pub synopsis: String,
    pub detail: String,
    pub key_notes: Vec<String>,
}

impl From<PartialSummary> for FinalSummary {
    fn from(partial: PartialSummary) -> Self {
        Self {
            synopsis: partial.synopsis,
            detail: partial.detail,
            key_notes: partial.key_notes,
        }
    }
}

/// Overall processing outcome of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Every chunk summarized and merged normally.
    Ok,
    /// Summarized, but with failed chunks or a degraded merge.
    Partial,
    /// No summary could be produced. The row is still emitted.
    Unprocessable,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::Partial => "partial",
            RecordStatus::Unprocessable => "unprocessable",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ok" => Ok(RecordStatus::Ok),
            "partial" => Ok(RecordStatus::Partial),
            "unprocessable" => Ok(RecordStatus::Unprocessable),
            other => Err(format!("unknown record status: '{}'", other)),
        }
    }
}

/// Quality signals attached to a record for downstream review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusFlag {
    EmptyText,
    UnreadableSource,
    HardSplit,
    ChunkFailed,
    ShortSummary,
    MergeFailed,
    UnclearPassages,
    /// Processing stopped abnormally (a panicked task).
    ProcessingFailed,
}

impl StatusFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFlag::EmptyText => "empty_text",
            StatusFlag::UnreadableSource => "unreadable_source",
            StatusFlag::HardSplit => "hard_split",
            StatusFlag::ChunkFailed => "chunk_failed",
            StatusFlag::ShortSummary => "short_summary",
            StatusFlag::MergeFailed => "merge_failed",
            StatusFlag::UnclearPassages => "unclear_passages",
            StatusFlag::ProcessingFailed => "processing_failed",
        }
    }

    /// Flags that downgrade an otherwise successful record to `partial`.
    pub fn is_degrading(&self) -> bool {
        matches!(
            self,
            StatusFlag::ChunkFailed | StatusFlag::ShortSummary | StatusFlag::MergeFailed
        )
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "empty_text" => Ok(StatusFlag::EmptyText),
            "unreadable_source" => Ok(StatusFlag::UnreadableSource),
            "hard_split" => Ok(StatusFlag::HardSplit),
            "chunk_failed" => Ok(StatusFlag::ChunkFailed),
            "short_summary" => Ok(StatusFlag::ShortSummary),
            "merge_failed" => Ok(StatusFlag::MergeFailed),
            "unclear_passages" => Ok(StatusFlag::UnclearPassages),
            "processing_failed" => Ok(StatusFlag::ProcessingFailed),
            other => Err(format!("unknown status flag: '{}'", other)),
        }
    }
}

/// The unit persisted to the tabular store: one row per meeting document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub date: NaiveDate,
    pub source_filename: String,
    pub status: RecordStatus,
    pub flags: Vec<StatusFlag>,
    pub chunk_count: usize,
    pub failed_chunks: Vec<usize>,
    /// SHA-256 of the normalized text that was summarized.
    pub source_sha256: String,
    pub summary: FinalSummary,
}

impl DocumentRecord {
    /// A row for a document that produced no summary at all.
    pub fn unprocessable(doc: &SourceDocument, flag: StatusFlag, source_sha256: String) -> Self {
        Self {
            date: doc.date,
            source_filename: doc.source_filename.clone(),
            status: RecordStatus::Unprocessable,
            flags: vec![flag],
            chunk_count: 0,
            failed_chunks: Vec::new(),
            source_sha256,
            summary: FinalSummary::default(),
        }
    }

    /// Uniqueness key in the tabular store.
    pub fn key(&self) -> (NaiveDate, String) {
        (self.date, self.source_filename.clone())
    }

    /// Add a flag once, keeping flags sorted for stable output.
    pub fn add_flag(&mut self, flag: StatusFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
            self.flags.sort();
        }
    }
}

/// Attendee-category columns of one attendance row, keyed by column name.
pub type AttendeeFields = BTreeMap<String, String>;

/// One row of the attendance table, before date normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub date_raw: String,
    pub fields: AttendeeFields,
}

/// All attendance rows that share a normalized meeting date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceGroup {
    pub date: NaiveDate,
    pub attendees: Vec<AttendeeFields>,
}

/// A document record joined with its meeting's attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    pub record: DocumentRecord,
    pub attendees: Vec<AttendeeFields>,
}
