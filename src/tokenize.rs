//! Token counting for chunk budgets.
//!
//! Chunk sizes and merge budgets are measured in model tokens, not characters,
//! because the text-generation service bills and limits on tokens. The
//! [`TokenCounter`] trait hides which tokenizer is in use:
//!
//! - **[`HeuristicCounter`]**: `ceil(chars / 4)`, no model files required.
//! - **[`HfTokenizer`]**: exact counts from a Hugging Face `tokenizer.json`
//!   (feature `hf-tokenizer`).
//!
//! Use [`create_counter`] to build the counter named in the configuration.

use anyhow::Result;
use std::sync::Arc;

use crate::config::ChunkingConfig;

/// Approximate chars-per-token ratio for English prose.
const CHARS_PER_TOKEN: usize = 4;

/// Counts model tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Short name for logs (e.g. `"heuristic"`).
    fn name(&self) -> &str;

    fn count(&self, text: &str) -> usize;
}

/// Character-ratio approximation of a BPE tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Exact token counts from a serialized Hugging Face tokenizer.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenizer {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            anyhow::anyhow!("Failed to load tokenizer {}: {}", path.display(), e)
        })?;
        Ok(Self { inner })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenizer {
    fn name(&self) -> &str {
        "hf-tokenizer"
    }

    fn count(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.len(),
            // Fall back to the approximation on encoder errors.
            Err(_) => HeuristicCounter.count(text),
        }
    }
}

/// Build the token counter selected by `chunking.tokenizer`.
///
/// `"heuristic"` selects [`HeuristicCounter`]; any other value is a path to a
/// `tokenizer.json` file.
pub fn create_counter(config: &ChunkingConfig) -> Result<Arc<dyn TokenCounter>> {
    match config.tokenizer.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicCounter)),
        #[cfg(feature = "hf-tokenizer")]
        path => Ok(Arc::new(HfTokenizer::from_file(std::path::Path::new(path))?)),
        #[cfg(not(feature = "hf-tokenizer"))]
        path => anyhow::bail!(
            "Tokenizer file '{}' requires --features hf-tokenizer",
            path
        ),
    }
}
