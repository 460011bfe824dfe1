//! Text extraction for source files.
//!
//! Searchable PDFs (the OCR engine's output) go through `pdf-extract`;
//! transcripts and plain-text minutes are read as UTF-8, replacing invalid
//! sequences. Extraction never panics: failures come back as
//! [`ExtractError`] and the caller records the document as unreadable.

use std::path::Path;

pub use crate::error::ExtractError;

/// Kinds of source file the pipeline can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Text,
}

impl SourceKind {
    /// Classify by file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(SourceKind::Pdf),
            "txt" | "md" => Ok(SourceKind::Text),
            _ => Err(ExtractError::UnsupportedFileType(
                path.display().to_string(),
            )),
        }
    }
}

/// Extract plain text from in-memory file contents.
pub fn extract_text(bytes: &[u8], kind: SourceKind) -> Result<String, ExtractError> {
    match kind {
        SourceKind::Pdf => extract_pdf(bytes),
        SourceKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Read and extract a file from disk.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let kind = SourceKind::from_path(path)?;
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract_text(&bytes, kind)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_returns_error() {
        let err = SourceKind::from_path(Path::new("1973-01-15.docx")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(_)));
    }

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(
            SourceKind::from_path(Path::new("1973-01-15_ocr.PDF")).unwrap(),
            SourceKind::Pdf
        );
        assert_eq!(
            SourceKind::from_path(Path::new("notes.md")).unwrap(),
            SourceKind::Text
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", SourceKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn text_with_invalid_utf8_is_lossy() {
        let text = extract_text(b"Minutes \xff of meeting", SourceKind::Text).unwrap();
        assert!(text.starts_with("Minutes "));
        assert!(text.ends_with(" of meeting"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = extract_file(Path::new("/nonexistent/1973-01-15.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
