//! Source discovery and selection.
//!
//! Walks `paths.input_dir` with the configured include/exclude globs and
//! turns matching files into one [`Selection`] per meeting date:
//!
//! 1. **Date key**: `YYYY-MM-DD` or `YYYY_MM_DD` in the file name, else the
//!    nearest parent folder named `YYYY-MM-DD`. Undated files are skipped.
//! 2. **Backups**: files whose name contains `backup` are ignored.
//! 3. **Parts**: `<stem>_part_NNN.<ext>` files are grouped into one logical
//!    source, stitched in numeric part order.
//! 4. **Precedence**: when several logical sources share a date, the
//!    [`Precedence`] rule picks one (by default, OCR output over originals).
//!    Ties go to the lexicographically first file name; the rest are
//!    reported as superseded.
//!
//! All of this happens before any text is extracted, so superseded files
//! never cost a generation call.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, SelectionConfig};
use crate::extract::extract_file;
use crate::models::SourceDocument;

/// A logical source file: one file, or a set of numbered parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub date: NaiveDate,
    /// File name with any `_part_NNN` suffix removed.
    pub source_filename: String,
    /// Files in stitching order.
    pub paths: Vec<PathBuf>,
}

/// The source chosen for one meeting date.
pub type Selection = Candidate;

/// Ranks competing sources for the same date. Lower ranks win.
pub trait Precedence: Send + Sync {
    fn rank(&self, candidate: &Candidate) -> usize;
}

/// Prefers file names carrying an earlier marker from the list; names with
/// no marker rank last.
#[derive(Debug, Clone)]
pub struct MarkerPrecedence {
    markers: Vec<String>,
}

impl MarkerPrecedence {
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }
}

impl Precedence for MarkerPrecedence {
    fn rank(&self, candidate: &Candidate) -> usize {
        let name = candidate.source_filename.to_lowercase();
        self.markers
            .iter()
            .position(|marker| name.contains(marker.as_str()))
            .unwrap_or(self.markers.len())
    }
}

/// Result of scanning the collection.
#[derive(Debug, Default)]
pub struct Discovery {
    /// One per date, sorted by date.
    pub selected: Vec<Selection>,
    /// Lost to a higher-precedence source for the same date.
    pub superseded: Vec<Candidate>,
    /// Relative paths with no recognizable date.
    pub undated: Vec<String>,
    pub backups_skipped: usize,
}

/// Date-range, count, and file-name restrictions from the command line.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub limit: Option<usize>,
    /// Only these file names (logical or part file names).
    pub files: Vec<String>,
}

impl SourceFilter {
    pub fn matches(&self, selection: &Selection) -> bool {
        if self.since.is_some_and(|since| selection.date < since) {
            return false;
        }
        if self.until.is_some_and(|until| selection.date > until) {
            return false;
        }
        if !self.files.is_empty() {
            let names = std::iter::once(selection.source_filename.as_str()).chain(
                selection
                    .paths
                    .iter()
                    .filter_map(|p| p.file_name().and_then(|n| n.to_str())),
            );
            let wanted = names.into_iter().any(|n| self.files.iter().any(|f| f == n));
            if !wanted {
                return false;
            }
        }
        true
    }

    /// Keep matching selections in date order, up to `limit`.
    pub fn apply(&self, selections: Vec<Selection>) -> Vec<Selection> {
        let matching = selections.into_iter().filter(|s| self.matches(s));
        match self.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

fn filename_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})[-_](\d{2})[-_](\d{2})").expect("valid regex"))
}

fn folder_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid regex"))
}

fn part_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(.+)_part_(\d+)$").expect("valid regex"))
}

fn date_from_captures(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Meeting date for a path relative to the collection root.
pub fn date_from_path(relative: &Path) -> Option<NaiveDate> {
    let file_name = relative.file_name()?.to_string_lossy();
    let from_name = filename_date_regex()
        .captures_iter(&file_name)
        .find_map(|caps| date_from_captures(&caps));
    if from_name.is_some() {
        return from_name;
    }

    relative
        .ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name())
        .find_map(|dir| {
            let dir = dir.to_string_lossy();
            folder_date_regex()
                .captures(&dir)
                .and_then(|caps| date_from_captures(&caps))
        })
}

/// Split `<stem>_part_NNN.<ext>` into the logical file name and part number.
pub fn split_part(file_name: &str) -> Option<(String, u32)> {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };
    let caps = part_regex().captures(stem)?;
    let number = caps[2].parse().ok()?;
    let base = match ext {
        Some(ext) => format!("{}.{}", &caps[1], ext),
        None => caps[1].to_string(),
    };
    Some((base, number))
}

fn is_backup(file_name: &str) -> bool {
    file_name.to_lowercase().contains("backup")
}

/// Scan `input_dir` and select one source per date.
pub fn discover(
    input_dir: &Path,
    selection: &SelectionConfig,
    precedence: &dyn Precedence,
) -> Result<Discovery> {
    if !input_dir.is_dir() {
        bail!("Input directory does not exist: {}", input_dir.display());
    }

    let include_set = build_globset(&selection.include_globs)?;
    let exclude_set = build_globset(&selection.exclude_globs)?;
    let mut discovery = Discovery::default();

    // (date, directory, logical name) → numbered files
    let mut groups: BTreeMap<(NaiveDate, PathBuf, String), Vec<(u32, PathBuf)>> = BTreeMap::new();

    let walker = WalkDir::new(input_dir)
        .follow_links(selection.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(input_dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if selection.skip_backups && is_backup(&file_name) {
            debug!(path = %rel_str, "skipping backup file");
            discovery.backups_skipped += 1;
            continue;
        }

        let Some(date) = date_from_path(relative) else {
            info!(path = %rel_str, "no meeting date in file or folder name; skipping");
            discovery.undated.push(rel_str);
            continue;
        };

        let (logical, part) = split_part(&file_name).unwrap_or((file_name, 0));
        let dir = relative.parent().map(Path::to_path_buf).unwrap_or_default();
        groups
            .entry((date, dir, logical))
            .or_default()
            .push((part, path.to_path_buf()));
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<Candidate>> = BTreeMap::new();
    for ((date, _dir, source_filename), mut parts) in groups {
        parts.sort();
        by_date.entry(date).or_default().push(Candidate {
            date,
            source_filename,
            paths: parts.into_iter().map(|(_, path)| path).collect(),
        });
    }

    for (date, mut candidates) in by_date {
        candidates.sort_by(|a, b| {
            precedence
                .rank(a)
                .cmp(&precedence.rank(b))
                .then_with(|| a.source_filename.cmp(&b.source_filename))
        });
        let mut candidates = candidates.into_iter();
        let Some(winner) = candidates.next() else {
            continue;
        };
        for loser in candidates {
            info!(
                %date,
                selected = %winner.source_filename,
                superseded = %loser.source_filename,
                "multiple sources for one date; keeping the preferred one"
            );
            discovery.superseded.push(loser);
        }
        discovery.selected.push(winner);
    }

    if discovery.selected.is_empty() {
        warn!(input_dir = %input_dir.display(), "no dated source files found");
    }

    Ok(discovery)
}

/// Extract and stitch the text of a selection. Extraction failures yield an
/// invalid document rather than an error.
pub fn load_document(selection: &Selection) -> SourceDocument {
    let mut texts = Vec::with_capacity(selection.paths.len());
    let mut valid = true;

    for path in &selection.paths {
        match extract_file(path) {
            Ok(text) => texts.push(text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "text extraction failed");
                valid = false;
                break;
            }
        }
    }

    SourceDocument {
        date: selection.date,
        source_filename: selection.source_filename.clone(),
        path: selection.paths.first().cloned().unwrap_or_default(),
        text: if valid { texts.join("\n\n") } else { String::new() },
        valid,
    }
}

/// Print the selected sources for each date, then the superseded ones.
pub fn list_sources(config: &Config) -> Result<()> {
    let precedence = MarkerPrecedence::new(&config.selection.prefer_markers);
    let discovery = discover(&config.paths.input_dir, &config.selection, &precedence)?;

    println!("{:<12} {:<48} PARTS", "DATE", "SOURCE");
    for selection in &discovery.selected {
        println!(
            "{:<12} {:<48} {}",
            selection.date.to_string(),
            selection.source_filename,
            selection.paths.len()
        );
    }

    if !discovery.superseded.is_empty() {
        println!();
        println!("Superseded:");
        for candidate in &discovery.superseded {
            println!("  {}  {}", candidate.date, candidate.source_filename);
        }
    }

    println!();
    println!(
        "{} dates, {} superseded, {} undated, {} backups skipped",
        discovery.selected.len(),
        discovery.superseded.len(),
        discovery.undated.len(),
        discovery.backups_skipped
    );

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn scan(root: &Path) -> Discovery {
        let selection = SelectionConfig::default();
        let precedence = MarkerPrecedence::new(&selection.prefer_markers);
        discover(root, &selection, &precedence).unwrap()
    }

    #[test]
    fn test_date_from_filename_and_folder() {
        assert_eq!(
            date_from_path(Path::new("1973/1973-01-15_minutes.pdf")),
            Some(d(1973, 1, 15))
        );
        assert_eq!(
            date_from_path(Path::new("minutes_1973_02_12_ocr.pdf")),
            Some(d(1973, 2, 12))
        );
        assert_eq!(
            date_from_path(Path::new("1973-03-05/page1.txt")),
            Some(d(1973, 3, 5))
        );
        assert_eq!(date_from_path(Path::new("misc/notes.txt")), None);
        assert_eq!(date_from_path(Path::new("1973-13-40_bad.txt")), None);
    }

    #[test]
    fn test_split_part() {
        assert_eq!(
            split_part("1973-01-15_audio_part_002.txt"),
            Some(("1973-01-15_audio.txt".to_string(), 2))
        );
        assert_eq!(split_part("1973-01-15_audio.txt"), None);
    }

    #[test]
    fn test_marker_precedence_ranks() {
        let precedence = MarkerPrecedence::new(&["_ocr".to_string(), "_transcript".to_string()]);
        let candidate = |name: &str| Candidate {
            date: d(1973, 1, 15),
            source_filename: name.to_string(),
            paths: Vec::new(),
        };
        assert_eq!(precedence.rank(&candidate("1973-01-15_OCR.pdf")), 0);
        assert_eq!(precedence.rank(&candidate("1973-01-15_transcript.txt")), 1);
        assert_eq!(precedence.rank(&candidate("1973-01-15.pdf")), 2);
    }

    #[test]
    fn test_ocr_version_wins_over_original() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1973/1973-01-15.txt", "original");
        write(tmp.path(), "1973/1973-01-15_ocr.txt", "ocr");
        write(tmp.path(), "1973/1973-02-12.txt", "only");

        let discovery = scan(tmp.path());
        let names: Vec<_> = discovery
            .selected
            .iter()
            .map(|s| s.source_filename.as_str())
            .collect();
        assert_eq!(names, vec!["1973-01-15_ocr.txt", "1973-02-12.txt"]);
        assert_eq!(discovery.superseded.len(), 1);
        assert_eq!(discovery.superseded[0].source_filename, "1973-01-15.txt");
    }

    #[test]
    fn test_backups_and_undated_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1973-01-15_backup.txt", "old");
        write(tmp.path(), "readme.txt", "no date");
        write(tmp.path(), "1973-01-15.txt", "minutes");

        let discovery = scan(tmp.path());
        assert_eq!(discovery.selected.len(), 1);
        assert_eq!(discovery.backups_skipped, 1);
        assert_eq!(discovery.undated, vec!["readme.txt".to_string()]);
    }

    #[test]
    fn test_parts_stitched_in_numeric_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "1973-01-15_audio_part_10.txt", "third");
        write(tmp.path(), "1973-01-15_audio_part_2.txt", "second");
        write(tmp.path(), "1973-01-15_audio_part_1.txt", "first");

        let discovery = scan(tmp.path());
        assert_eq!(discovery.selected.len(), 1);
        let doc = load_document(&discovery.selected[0]);
        assert!(doc.valid);
        assert_eq!(doc.source_filename, "1973-01-15_audio.txt");
        assert_eq!(doc.text, "first\n\nsecond\n\nthird");
    }

    #[test]
    fn test_unreadable_source_is_invalid() {
        let selection = Selection {
            date: d(1973, 1, 15),
            source_filename: "1973-01-15.pdf".to_string(),
            paths: vec![PathBuf::from("/nonexistent/1973-01-15.pdf")],
        };
        let doc = load_document(&selection);
        assert!(!doc.valid);
        assert!(doc.text.is_empty());
    }

    #[test]
    fn test_filter_since_until_limit_files() {
        let mk = |y, m, day, name: &str| Selection {
            date: d(y, m, day),
            source_filename: name.to_string(),
            paths: vec![PathBuf::from(name)],
        };
        let all = vec![
            mk(1972, 12, 4, "a.txt"),
            mk(1973, 1, 15, "b.txt"),
            mk(1973, 2, 12, "c.txt"),
            mk(1973, 3, 5, "d.txt"),
        ];

        let filter = SourceFilter {
            since: Some(d(1973, 1, 1)),
            until: Some(d(1973, 2, 28)),
            ..Default::default()
        };
        let kept: Vec<_> = filter.apply(all.clone()).into_iter().map(|s| s.source_filename).collect();
        assert_eq!(kept, vec!["b.txt", "c.txt"]);

        let filter = SourceFilter {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(filter.apply(all.clone()).len(), 1);

        let filter = SourceFilter {
            files: vec!["d.txt".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.apply(all)[0].source_filename, "d.txt");
    }

    #[test]
    fn test_missing_input_dir_is_error() {
        let selection = SelectionConfig::default();
        let precedence = MarkerPrecedence::new(&selection.prefer_markers);
        assert!(discover(Path::new("/nonexistent/minutes"), &selection, &precedence).is_err());
    }
}
