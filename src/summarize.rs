//! Per-chunk summarization.
//!
//! Builds the prompt for one [`Chunk`], sends it through a [`TextGenerator`],
//! and parses the free-text response into a [`PartialSummary`] by fixed
//! section markers:
//!
//! ```text
//! SYNOPSIS: <two or three sentences>
//! DETAIL: <paragraph-level account>        (alias: SUMMARY:)
//! KEY NOTES:
//! - <one fact per line>
//! UNCLEAR:                                 (optional)
//! - <passage the model could not read>
//! ```
//!
//! Models decorate headings in various ways, so `**Synopsis:**`,
//! `## Detail:` and `1. Key Notes:` are all accepted. A response missing
//! either the synopsis or the detail is a [`SummarizeError::Parse`].

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::SummarizeError;
use crate::generate::{Constraints, Prompt, TextGenerator};
use crate::models::{Chunk, PartialSummary};

/// System role sent with every chunk and merge request.
pub const ARCHIVIST_ROLE: &str = "You are an archivist and historian preparing structured \
records of historical meeting minutes. You summarize only the text you are given. You never \
add facts from outside knowledge, and you never guess at words you cannot read.";

/// Where a chunk sits in its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkContext {
    pub date: NaiveDate,
    pub index: usize,
    pub total_count: usize,
    /// Synopsis of the preceding chunk, when it is already known.
    pub previous_synopsis: Option<String>,
}

impl ChunkContext {
    pub fn for_chunk(date: NaiveDate, chunk: &Chunk, previous_synopsis: Option<String>) -> Self {
        Self {
            date,
            index: chunk.index,
            total_count: chunk.total_count,
            previous_synopsis,
        }
    }
}

/// Summarize one chunk. Retries are the generator's concern; any error that
/// reaches here marks the chunk failed.
pub async fn summarize(
    generator: &dyn TextGenerator,
    chunk: &Chunk,
    context: &ChunkContext,
    constraints: &Constraints,
) -> Result<PartialSummary, SummarizeError> {
    let prompt = build_prompt(chunk, context);
    let response = generator.generate(&prompt, constraints).await?;
    let mut partial = parse_sections(&response)?;
    partial.index = chunk.index;
    debug!(
        chunk_index = chunk.index,
        key_notes = partial.key_notes.len(),
        unclear = partial.unclear.len(),
        "chunk summarized"
    );
    Ok(partial)
}

pub fn build_prompt(chunk: &Chunk, context: &ChunkContext) -> Prompt {
    let mut user = format!(
        "Meeting date: {}\nThis is part {} of {} of the meeting record.\n",
        context.date,
        context.index + 1,
        context.total_count
    );

    if let Some(previous) = context.previous_synopsis.as_deref() {
        user.push_str(&format!(
            "For continuity, the previous part was summarized as: {}\n",
            previous
        ));
    }

    user.push_str(
        "\nRules:\n\
         - Use only the text supplied below. Do not add external, historical, or inferred knowledge.\n\
         - Keep names, motions, votes, amounts, and dates exactly as they appear.\n\
         - If a passage is illegible, garbled, or cut off, list it under UNCLEAR instead of guessing.\n\
         \n\
         Respond in exactly this format:\n\
         SYNOPSIS: <two or three sentences>\n\
         DETAIL: <a detailed account of this part>\n\
         KEY NOTES:\n\
         - <one fact per line>\n\
         UNCLEAR:\n\
         - <each unclear passage, or None>\n\
         \n\
         Text:\n\"\"\"\n",
    );
    user.push_str(&chunk.text);
    user.push_str("\n\"\"\"\n");

    Prompt {
        system: ARCHIVIST_ROLE.to_string(),
        user,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Synopsis,
    Detail,
    KeyNotes,
    Unclear,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:#+\s*)?(?:\d+[.)]\s*)?[*_]*\s*(synopsis|detailed summary|detail|summary|key\s*notes?|unclear(?:\s+passages)?)\s*[*_]*\s*:\s*[*_]*\s*(.*)$",
        )
        .expect("valid regex")
    })
}

fn section_for(name: &str) -> Section {
    let name = name.to_lowercase();
    if name.starts_with("synopsis") {
        Section::Synopsis
    } else if name.starts_with("key") {
        Section::KeyNotes
    } else if name.starts_with("unclear") {
        Section::Unclear
    } else {
        Section::Detail
    }
}

#[derive(Debug, Default)]
struct RawSections<'a> {
    synopsis: Vec<&'a str>,
    detail: Vec<&'a str>,
    key_notes: Vec<&'a str>,
    unclear: Vec<&'a str>,
    saw_marker: bool,
}

fn split_sections(response: &str) -> RawSections<'_> {
    let mut raw = RawSections::default();
    let mut current: Option<Section> = None;

    for line in response.lines() {
        let content = match marker_regex().captures(line) {
            Some(caps) => {
                current = Some(section_for(&caps[1]));
                raw.saw_marker = true;
                caps.get(2).map_or("", |m| m.as_str())
            }
            None => line,
        };

        let target = match current {
            Some(Section::Synopsis) => &mut raw.synopsis,
            Some(Section::Detail) => &mut raw.detail,
            Some(Section::KeyNotes) => &mut raw.key_notes,
            Some(Section::Unclear) => &mut raw.unclear,
            None => continue,
        };
        target.push(content);
    }

    raw
}

/// Split a response into sections by marker lines.
///
/// Text before the first marker is ignored. A repeated marker appends to the
/// section it names.
pub fn parse_sections(response: &str) -> Result<PartialSummary, SummarizeError> {
    let raw = split_sections(response);
    let synopsis = join_prose(&raw.synopsis);
    let detail = join_prose(&raw.detail);

    if synopsis.is_empty() {
        return Err(SummarizeError::Parse("missing SYNOPSIS section".to_string()));
    }
    if detail.is_empty() {
        return Err(SummarizeError::Parse("missing DETAIL section".to_string()));
    }

    Ok(PartialSummary {
        index: 0,
        synopsis,
        detail,
        key_notes: list_items(&raw.key_notes),
        unclear: list_items(&raw.unclear),
    })
}

/// The synopsis and detail of a merge response. Unmarked responses are
/// taken whole as the synopsis; a missing detail is returned empty.
pub(crate) fn parse_condensed(response: &str) -> (String, String) {
    let raw = split_sections(response);
    if !raw.saw_marker {
        let lines: Vec<&str> = response.lines().collect();
        return (join_prose(&lines), String::new());
    }
    (join_prose(&raw.synopsis), join_prose(&raw.detail))
}

/// Join prose lines, keeping paragraph breaks and dropping decoration.
fn join_prose(lines: &[&str]) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in lines {
        let line = line.trim().trim_matches('*').trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n")
}

/// One item per non-empty line with list markers removed. "None" and
/// similar placeholders yield no item.
fn list_items(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .map(|line| strip_list_marker(line.trim()).trim().to_string())
        .filter(|item| !item.is_empty() && !is_placeholder(item))
        .collect()
}

/// Remove a leading `-`, `*`, `•` or `1.`/`1)` marker.
pub(crate) fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('*'))
        .or_else(|| trimmed.strip_prefix('•'))
    {
        return rest.trim_start();
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest.trim_start();
            }
        }
    }
    trimmed
}

fn is_placeholder(item: &str) -> bool {
    let lowered = item.trim_end_matches('.').to_lowercase();
    matches!(lowered.as_str(), "none" | "n/a" | "nothing unclear" | "none noted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generate::mock::MockGenerator;

    fn chunk(index: usize, total: usize, text: &str) -> Chunk {
        Chunk {
            document_id: "1973-01-15/minutes.pdf".into(),
            index,
            total_count: total,
            text: text.into(),
        }
    }

    fn context(index: usize, total: usize, previous: Option<&str>) -> ChunkContext {
        ChunkContext {
            date: NaiveDate::from_ymd_opt(1973, 1, 15).unwrap(),
            index,
            total_count: total,
            previous_synopsis: previous.map(String::from),
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            max_output_tokens: 800,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_parse_plain_markers() {
        let response = "SYNOPSIS: The board met.\n\
                        DETAIL: The board met and approved the budget.\n\
                        KEY NOTES:\n\
                        - Budget approved 5-0\n\
                        - Next meeting Feb 12\n\
                        UNCLEAR:\n\
                        None";
        let partial = parse_sections(response).unwrap();
        assert_eq!(partial.synopsis, "The board met.");
        assert_eq!(partial.detail, "The board met and approved the budget.");
        assert_eq!(partial.key_notes, vec!["Budget approved 5-0", "Next meeting Feb 12"]);
        assert!(partial.unclear.is_empty());
    }

    #[test]
    fn test_parse_markdown_decorated_markers() {
        let response = "Here is the summary.\n\n\
                        **Synopsis:** Roads were discussed.\n\n\
                        ## Summary:\nThe council reviewed\nroad repairs.\n\n\
                        1. Key Notes:\n1. Paving contract awarded\n2) Mr. Hall abstained\n\
                        **Unclear**:\n* page 3 water damaged";
        let partial = parse_sections(response).unwrap();
        assert_eq!(partial.synopsis, "Roads were discussed.");
        assert_eq!(partial.detail, "The council reviewed road repairs.");
        assert_eq!(
            partial.key_notes,
            vec!["Paving contract awarded", "Mr. Hall abstained"]
        );
        assert_eq!(partial.unclear, vec!["page 3 water damaged"]);
    }

    #[test]
    fn test_parse_multi_paragraph_detail() {
        let response = "SYNOPSIS: s\nDETAIL: first para\n\nsecond para\nKEY NOTES: none";
        let partial = parse_sections(response).unwrap();
        assert_eq!(partial.detail, "first para\n\nsecond para");
        assert!(partial.key_notes.is_empty());
    }

    #[test]
    fn test_parse_missing_detail_is_error() {
        let err = parse_sections("SYNOPSIS: only this").unwrap_err();
        assert!(matches!(err, SummarizeError::Parse(_)));
    }

    #[test]
    fn test_parse_free_text_is_error() {
        assert!(parse_sections("I'm sorry, I can't read this document.").is_err());
    }

    #[test]
    fn test_parse_condensed() {
        assert_eq!(
            parse_condensed("SYNOPSIS: One.\nDETAIL: Two."),
            ("One.".to_string(), "Two.".to_string())
        );
        assert_eq!(
            parse_condensed("Just prose\nover two lines."),
            ("Just prose over two lines.".to_string(), String::new())
        );
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("- item"), "item");
        assert_eq!(strip_list_marker("• item"), "item");
        assert_eq!(strip_list_marker("12. item"), "item");
        assert_eq!(strip_list_marker("3) item"), "item");
        assert_eq!(strip_list_marker("1973 budget"), "1973 budget");
        assert_eq!(strip_list_marker("5.5 mills levied"), "5.5 mills levied");
    }

    #[test]
    fn test_prompt_carries_position_and_rules() {
        let prompt = build_prompt(
            &chunk(1, 3, "Motion to adjourn."),
            &context(1, 3, Some("The board opened the meeting.")),
        );
        assert_eq!(prompt.system, ARCHIVIST_ROLE);
        assert!(prompt.user.contains("1973-01-15"));
        assert!(prompt.user.contains("part 2 of 3"));
        assert!(prompt.user.contains("The board opened the meeting."));
        assert!(prompt.user.contains("Use only the text supplied"));
        assert!(prompt.user.contains("UNCLEAR"));
        assert!(prompt.user.contains("Motion to adjourn."));
    }

    #[test]
    fn test_prompt_without_previous_synopsis() {
        let prompt = build_prompt(&chunk(0, 1, "text"), &context(0, 1, None));
        assert!(!prompt.user.contains("previous part"));
    }

    #[tokio::test]
    async fn test_summarize_sets_chunk_index() {
        let generator = MockGenerator::new(|_| {
            Ok("SYNOPSIS: s\nDETAIL: d\nKEY NOTES:\n- fact".to_string())
        });
        let partial = summarize(&generator, &chunk(2, 3, "t"), &context(2, 3, None), &constraints())
            .await
            .unwrap();
        assert_eq!(partial.index, 2);
        assert_eq!(partial.key_notes, vec!["fact"]);
    }

    #[tokio::test]
    async fn test_summarize_propagates_generation_error() {
        let generator = MockGenerator::new(|_| Err(GenerationError::Fatal("401".into())));
        let err = summarize(&generator, &chunk(0, 1, "t"), &context(0, 1, None), &constraints())
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::Generation(_)));
    }
}
