//! OCR and transcription cleanup applied before chunking.
//!
//! Extracted meeting minutes carry scanner noise: stray control characters,
//! words broken across lines by hyphenation, ragged whitespace, and a handful
//! of recurring character misreads. [`normalize_text`] removes these so that
//! chunk boundaries and token counts reflect the actual content.

use regex::{Captures, Regex};
use std::sync::OnceLock;

static HYPHEN_BREAK: OnceLock<Regex> = OnceLock::new();
static INLINE_SPACE: OnceLock<Regex> = OnceLock::new();
static LINE_EDGE_SPACE: OnceLock<Regex> = OnceLock::new();
static EXCESS_NEWLINES: OnceLock<Regex> = OnceLock::new();
static OCR_MISREADS: OnceLock<Regex> = OnceLock::new();

fn hyphen_break() -> &'static Regex {
    HYPHEN_BREAK.get_or_init(|| Regex::new(r"(\p{L})-[ \t]*\n[ \t]*(\p{Ll})").unwrap())
}

fn inline_space() -> &'static Regex {
    INLINE_SPACE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

fn line_edge_space() -> &'static Regex {
    LINE_EDGE_SPACE.get_or_init(|| Regex::new(r" ?\n ?").unwrap())
}

fn excess_newlines() -> &'static Regex {
    EXCESS_NEWLINES.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

fn ocr_misreads() -> &'static Regex {
    OCR_MISREADS.get_or_init(|| {
        Regex::new(r"\b(mado|soconded|moeting|minutos|adjournod|motlon)\b").unwrap()
    })
}

/// Recurring misreads seen in typewritten board minutes.
///
/// Only lowercase non-words are listed. Misreads that collide with real
/// words or abbreviations (`tho`, `ard`, `bo`) are left for the summarizer
/// to read in context.
fn correct_misread(word: &str) -> &'static str {
    match word {
        "mado" => "made",
        "soconded" => "seconded",
        "moeting" => "meeting",
        "minutos" => "minutes",
        "adjournod" => "adjourned",
        "motlon" => "motion",
        _ => "",
    }
}

/// Normalize extracted text for chunking.
///
/// Deterministic and idempotent: `normalize_text(normalize_text(x)) ==
/// normalize_text(x)`.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace(['\r', '\u{0c}'], "\n");

    let printable: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let joined = hyphen_break().replace_all(&printable, "$1$2");
    let spaced = inline_space().replace_all(&joined, " ");
    let edged = line_edge_space().replace_all(&spaced, "\n");
    let paragraphs = excess_newlines().replace_all(&edged, "\n\n");
    let corrected = ocr_misreads().replace_all(&paragraphs, |caps: &Captures| {
        correct_misread(&caps[1]).to_string()
    });

    corrected.trim().to_string()
}
