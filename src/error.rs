//! Error types for the summarization pipeline.
//!
//! Callers branch on these kinds: the dispatcher retries transient
//! generation errors, the summarizer turns exhausted retries and parse
//! failures into failed chunks, and discovery records extraction failures on
//! the document instead of aborting the batch.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single text-generation call.
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    /// HTTP 429 or an equivalent provider signal.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The per-call deadline expired.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// Server errors and network failures.
    #[error("transient generation error: {0}")]
    Transient(String),

    /// Client errors, missing credentials, disabled provider.
    #[error("generation failed: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, GenerationError::Fatal(_))
    }
}

/// Failure to turn one chunk into a partial summary.
#[derive(Error, Debug, Clone)]
pub enum SummarizeError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The response lacked one of the required section markers.
    #[error("unparseable response: {0}")]
    Parse(String),
}

/// Failure to read text out of a source file.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
