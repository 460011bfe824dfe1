//! Merge reducer: ordered partial summaries → one document summary.
//!
//! | Partials | Behaviour |
//! |----------|-----------|
//! | 0 | nothing to merge; the caller records the document as unprocessable |
//! | 1 | promoted verbatim, no generation call |
//! | many | key notes unioned and deduplicated, details joined with `[Part i/n]` markers, synopsis condensed by one call |
//!
//! When the condensing prompt would exceed `merge_budget_tokens`, the reducer
//! switches to short-summary mode: the call sees only the partial synopses and
//! its answer replaces the detail. A failed condensing call never fails the
//! document; the ordered synopses are used instead and the outcome is flagged.
//!
//! # Key-note deduplication
//!
//! Two notes are duplicates when their [`note_key`] is equal: lowercase, list
//! marker stripped, whitespace collapsed, trailing `.,;:` removed. The first
//! occurrence's original text is kept.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::chunk::is_abbreviation;
use crate::config::GenerationConfig;
use crate::generate::{Constraints, Prompt, TextGenerator};
use crate::models::{FinalSummary, PartialSummary, StatusFlag};
use crate::summarize::{parse_condensed, strip_list_marker, ARCHIVIST_ROLE};
use crate::tokenize::TokenCounter;

/// Upper bound on synopsis length after merging.
pub const MAX_SYNOPSIS_SENTENCES: usize = 7;

/// Merge limits and output constraints.
#[derive(Debug, Clone, Copy)]
pub struct MergeSettings {
    pub budget_tokens: usize,
    pub constraints: Constraints,
}

impl MergeSettings {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            budget_tokens: config.merge_budget_tokens,
            constraints: Constraints::from_config(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub summary: FinalSummary,
    pub flags: Vec<StatusFlag>,
}

/// Merge `partials` (sorted by chunk index) of a document cut into
/// `total_chunks` chunks. Returns `None` when there is nothing to merge.
pub async fn merge(
    generator: &dyn TextGenerator,
    counter: &dyn TokenCounter,
    date: NaiveDate,
    partials: &[PartialSummary],
    total_chunks: usize,
    settings: &MergeSettings,
) -> Option<MergeOutcome> {
    match partials {
        [] => None,
        [only] => Some(MergeOutcome {
            summary: FinalSummary::from(only.clone()),
            flags: Vec::new(),
        }),
        _ => Some(merge_many(generator, counter, date, partials, total_chunks, settings).await),
    }
}

async fn merge_many(
    generator: &dyn TextGenerator,
    counter: &dyn TokenCounter,
    date: NaiveDate,
    partials: &[PartialSummary],
    total_chunks: usize,
    settings: &MergeSettings,
) -> MergeOutcome {
    let key_notes = dedup_key_notes(partials.iter().flat_map(|p| p.key_notes.iter()));
    let joined_detail = join_details(partials, total_chunks);
    let ordered_synopses = join_synopses(partials);
    let mut flags = Vec::new();

    let full_prompt = condense_prompt(date, partials, total_chunks, true);
    let full_tokens = counter.count(&full_prompt.system) + counter.count(&full_prompt.user);

    let (synopsis, detail) = if full_tokens <= settings.budget_tokens {
        match generator.generate(&full_prompt, &settings.constraints).await {
            Ok(response) => {
                let (synopsis, _) = parse_condensed(&response);
                if synopsis.is_empty() {
                    warn!(%date, "merge response had no synopsis; using ordered partial synopses");
                    flags.push(StatusFlag::MergeFailed);
                    (ordered_synopses.clone(), joined_detail)
                } else {
                    (synopsis, joined_detail)
                }
            }
            Err(e) => {
                warn!(%date, error = %e, "merge call failed; using ordered partial synopses");
                flags.push(StatusFlag::MergeFailed);
                (ordered_synopses.clone(), joined_detail)
            }
        }
    } else {
        info!(
            %date,
            prompt_tokens = full_tokens,
            budget = settings.budget_tokens,
            "merge prompt over budget; switching to short summary"
        );
        flags.push(StatusFlag::ShortSummary);

        let short_prompt = condense_prompt(date, partials, total_chunks, false);
        match generator.generate(&short_prompt, &settings.constraints).await {
            Ok(response) => {
                let (synopsis, short) = parse_condensed(&response);
                let detail = if short.is_empty() { synopsis.clone() } else { short };
                if synopsis.is_empty() {
                    flags.push(StatusFlag::MergeFailed);
                    (ordered_synopses.clone(), ordered_synopses.clone())
                } else {
                    (synopsis, detail)
                }
            }
            Err(e) => {
                warn!(%date, error = %e, "short-summary call failed; using ordered partial synopses");
                flags.push(StatusFlag::MergeFailed);
                (ordered_synopses.clone(), ordered_synopses.clone())
            }
        }
    };

    MergeOutcome {
        summary: FinalSummary {
            synopsis: clamp_sentences(&synopsis, MAX_SYNOPSIS_SENTENCES),
            detail,
            key_notes,
        },
        flags,
    }
}

/// Build the condensing request. `with_detail = false` is short-summary mode.
fn condense_prompt(
    date: NaiveDate,
    partials: &[PartialSummary],
    total_chunks: usize,
    with_detail: bool,
) -> Prompt {
    let mut user = format!(
        "Meeting date: {}\nThe meeting record was summarized in {} parts, given below in order.\n\n\
         Rules:\n\
         - Use only the information in the part summaries. Do not add facts.\n\
         - Keep names, votes, amounts, and dates exactly as given.\n\n",
        date, total_chunks
    );

    if with_detail {
        user.push_str(
            "Write one synopsis of the whole meeting in three to seven sentences.\n\
             Respond in exactly this format:\nSYNOPSIS: <three to seven sentences>\n\n",
        );
    } else {
        user.push_str(
            "Write one synopsis of the whole meeting in three to seven sentences, then a short \
             summary of the whole meeting in one or two paragraphs.\n\
             Respond in exactly this format:\nSYNOPSIS: <three to seven sentences>\n\
             DETAIL: <short summary>\n\n",
        );
    }

    for partial in partials {
        let part = partial.index + 1;
        user.push_str(&format!("Part {} synopsis: {}\n", part, partial.synopsis));
        if with_detail {
            user.push_str(&format!("Part {} detail: {}\n", part, partial.detail));
        }
        user.push('\n');
    }

    Prompt {
        system: ARCHIVIST_ROLE.to_string(),
        user,
    }
}

fn join_details(partials: &[PartialSummary], total_chunks: usize) -> String {
    partials
        .iter()
        .map(|p| format!("[Part {}/{}]\n{}", p.index + 1, total_chunks, p.detail))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn join_synopses(partials: &[PartialSummary]) -> String {
    partials
        .iter()
        .map(|p| p.synopsis.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison key for key-note deduplication.
pub fn note_key(note: &str) -> String {
    let stripped = strip_list_marker(note.trim());
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', ';', ':'])
        .trim_end()
        .to_lowercase()
}

/// Keep the first occurrence of each note by [`note_key`], in input order.
/// Notes whose key is empty are dropped.
pub fn dedup_key_notes<'a>(notes: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for note in notes {
        let key = note_key(note);
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            out.push(note.trim().to_string());
        }
    }
    out
}

/// Truncate `text` after its `max`-th sentence. Titles and initials such as
/// `Mr.` or `J.` do not end a sentence.
pub fn clamp_sentences(text: &str, max: usize) -> String {
    let text = text.trim();
    if max == 0 {
        return String::new();
    }

    let mut sentences = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') || is_abbreviation(text, i) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if matches!(next, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}') {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if !at_boundary {
            continue;
        }
        sentences += 1;
        if sentences == max {
            return text[..end].to_string();
        }
    }

    text.to_string()
}
