//! Sentence-boundary text chunker.
//!
//! Splits a document's text into [`Chunk`]s that respect a `max_tokens`
//! budget measured by a [`TokenCounter`]. The raw text is normalized first
//! (see [`crate::normalize`]); chunks are contiguous slices of the normalized
//! text, so concatenating them in index order reproduces it exactly.
//!
//! Boundaries fall at the last paragraph or sentence break that fits the
//! budget. When a run of text has no natural break within the budget, a hard
//! split is forced at the last newline or space that fits (or at a character
//! boundary as a last resort) and counted as a quality signal.

use tracing::warn;

use crate::models::Chunk;
use crate::normalize::normalize_text;
use crate::tokenize::TokenCounter;

/// Words that end in a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "st", "no", "jr", "sr", "vs", "etc", "inc", "co", "supt", "rev",
    "hon", "gen", "messrs",
];

/// Result of chunking one document.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// The normalized text the chunks were cut from.
    pub normalized: String,
    pub chunks: Vec<Chunk>,
    /// Number of boundaries that had to be forced mid-sentence.
    pub hard_splits: usize,
}

/// Normalize `raw` and split it into chunks of at most `max_tokens` tokens.
///
/// Empty or whitespace-only input yields no chunks. Indices are contiguous
/// from 0 and every chunk carries the final `total_count`.
pub fn chunk_text(
    document_id: &str,
    raw: &str,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> ChunkOutcome {
    let normalized = normalize_text(raw);
    let max_tokens = max_tokens.max(1);

    if normalized.is_empty() {
        return ChunkOutcome {
            normalized,
            chunks: Vec::new(),
            hard_splits: 0,
        };
    }

    let text = normalized.as_str();
    let breaks = natural_breaks(text);
    let fits = |start: usize, end: usize| counter.count(&text[start..end]) <= max_tokens;

    let mut pieces: Vec<&str> = Vec::new();
    let mut hard_splits = 0usize;
    let mut start = 0usize;

    while start < text.len() {
        if fits(start, text.len()) {
            pieces.push(&text[start..]);
            break;
        }

        // Breaks strictly inside (start, len); token count grows with the span.
        let lo = breaks.partition_point(|&b| b <= start);
        let candidates = &breaks[lo..];
        let fitting = candidates.partition_point(|&b| fits(start, b));

        let end = if fitting > 0 {
            candidates[fitting - 1]
        } else {
            hard_splits += 1;
            let end = forced_split(text, start, &fits);
            warn!(
                document_id,
                chunk_index = pieces.len(),
                max_tokens,
                "no sentence or paragraph break within budget; forcing a hard split"
            );
            end
        };

        pieces.push(&text[start..end]);
        start = end;
    }

    let total_count = pieces.len();
    let chunks = pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| Chunk {
            document_id: document_id.to_string(),
            index,
            total_count,
            text: piece.to_string(),
        })
        .collect();

    ChunkOutcome {
        normalized,
        chunks,
        hard_splits,
    }
}

/// Byte offsets where a chunk may end: after the whitespace that follows a
/// paragraph break or a sentence terminator. Sorted and deduplicated.
fn natural_breaks(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut breaks = Vec::new();
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let is_terminator = matches!(c, '.' | '!' | '?') && !is_abbreviation(text, i);
        let is_paragraph = c == '\n' && bytes.get(i + 1) == Some(&b'\n');

        if !is_terminator && !is_paragraph {
            continue;
        }

        // Closing quotes/brackets belong to the sentence they end.
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = iter.peek() {
            if is_terminator && matches!(next, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
                end = j + next.len_utf8();
                iter.next();
            } else {
                break;
            }
        }

        let mut saw_space = is_paragraph;
        while let Some(&(j, next)) = iter.peek() {
            if next.is_whitespace() {
                end = j + next.len_utf8();
                saw_space = true;
                iter.next();
            } else {
                break;
            }
        }

        if saw_space && end < text.len() && breaks.last() != Some(&end) {
            breaks.push(end);
        }
    }

    breaks
}

/// True when the period at `dot` closes a title or initial rather than a sentence.
pub(crate) fn is_abbreviation(text: &str, dot: usize) -> bool {
    if text.as_bytes()[dot] != b'.' {
        return false;
    }
    let word: String = text[..dot]
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if word.is_empty() {
        return false;
    }
    let single_initial = word.chars().count() == 1 && word.chars().all(char::is_uppercase);
    single_initial || ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Largest split point after `start` that fits, preferring a newline, then a
/// space. Always advances by at least one character.
fn forced_split(text: &str, start: usize, fits: &dyn Fn(usize, usize) -> bool) -> usize {
    let boundaries: Vec<usize> = text[start..]
        .char_indices()
        .skip(1)
        .map(|(offset, _)| start + offset)
        .collect();

    let fitting = boundaries.partition_point(|&b| fits(start, b));
    let limit = match fitting {
        0 => return boundaries.first().copied().unwrap_or(text.len()),
        n => boundaries[n - 1],
    };

    let window = &text[start..limit];
    let at_whitespace = window
        .rfind('\n')
        .or_else(|| window.rfind(' '))
        .map(|pos| start + pos + 1)
        .filter(|&split| !text[start..split].trim().is_empty());

    at_whitespace.unwrap_or(limit)
}
