//! Document record builder and batch orchestration.
//!
//! Coordinates the full flow for each selected source:
//! extract → normalize → chunk → summarize chunks → merge → record → store.
//!
//! A document always yields a [`DocumentRecord`]. Failures degrade the
//! record's status instead of aborting the batch:
//!
//! | Condition | Status | Flag |
//! |-----------|--------|------|
//! | extraction failed | `unprocessable` | `unreadable_source` |
//! | no text after normalization | `unprocessable` | `empty_text` |
//! | every chunk failed | `unprocessable` | `chunk_failed` |
//! | some chunks failed | `partial` | `chunk_failed` |
//! | merge over budget | `partial` | `short_summary` |
//! | merge call failed | `partial` | `merge_failed` |
//! | forced mid-sentence split | unchanged | `hard_split` |
//! | model reported unclear passages | unchanged | `unclear_passages` |
//! | processing task panicked | `unprocessable` | `processing_failed` |
//!
//! Documents already in the store are skipped before any text is extracted.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{GenerationError, SummarizeError};
use crate::extract::extract_file;
use crate::generate::{create_generator, Constraints, TextGenerator};
use crate::merge::{merge, MergeSettings};
use crate::models::{Chunk, DocumentRecord, PartialSummary, RecordStatus, SourceDocument, StatusFlag};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sources::{discover, load_document, MarkerPrecedence, Selection, SourceFilter};
use crate::store::CsvStore;
use crate::summarize::{summarize, ChunkContext};
use crate::tokenize::{create_counter, TokenCounter};

type ChunkResult = Result<PartialSummary, SummarizeError>;

const PREVIEW_CHARS: usize = 60;

/// Counts from one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub found: usize,
    /// Already in the store; not reprocessed.
    pub skipped: usize,
    pub ok: usize,
    pub partial: usize,
    pub unprocessable: usize,
    /// Not started because the run was interrupted.
    pub cancelled: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.ok + self.partial + self.unprocessable
    }

    /// True when any document could not be summarized at all.
    pub fn has_failures(&self) -> bool {
        self.unprocessable > 0
    }

    fn count(&mut self, record: &DocumentRecord) {
        match record.status {
            RecordStatus::Ok => self.ok += 1,
            RecordStatus::Partial => self.partial += 1,
            RecordStatus::Unprocessable => self.unprocessable += 1,
        }
    }
}

/// Builds document records. Cheap to share behind an `Arc`.
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
    constraints: Constraints,
    merge_settings: MergeSettings,
    chain_context: bool,
    document_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        counter: Arc<dyn TokenCounter>,
        config: &Config,
    ) -> Self {
        Self {
            generator,
            counter,
            max_tokens: config.chunking.max_tokens,
            constraints: Constraints::from_config(&config.generation),
            merge_settings: MergeSettings::from_config(&config.generation),
            chain_context: config.pipeline.chain_context,
            document_concurrency: config.pipeline.document_concurrency.max(1),
        }
    }

    /// Turn one source document into a record. Never fails; every problem
    /// is expressed in the record's status and flags.
    pub async fn process_document(&self, doc: &SourceDocument) -> DocumentRecord {
        if !doc.valid {
            warn!("source could not be read; recording as unprocessable");
            return DocumentRecord::unprocessable(doc, StatusFlag::UnreadableSource, String::new());
        }

        let document_id = doc.document_id();
        let outcome = chunk_text(&document_id, &doc.text, self.max_tokens, self.counter.as_ref());
        let source_sha256 = sha256_hex(&outcome.normalized);

        if outcome.chunks.is_empty() {
            warn!("no text after normalization; recording as unprocessable");
            return DocumentRecord::unprocessable(doc, StatusFlag::EmptyText, source_sha256);
        }

        let total = outcome.chunks.len();
        debug!(chunks = total, hard_splits = outcome.hard_splits, "document chunked");

        let results = if self.chain_context {
            self.summarize_chained(doc, &outcome.chunks).await
        } else {
            self.summarize_concurrent(doc, outcome.chunks).await
        };

        let mut partials = Vec::with_capacity(total);
        let mut failed_chunks = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(partial) => partials.push(partial),
                Err(e) => {
                    warn!(chunk_index = index, error = %e, "chunk summarization failed");
                    failed_chunks.push(index);
                }
            }
        }

        let mut record = DocumentRecord {
            date: doc.date,
            source_filename: doc.source_filename.clone(),
            status: RecordStatus::Ok,
            flags: Vec::new(),
            chunk_count: total,
            failed_chunks,
            source_sha256,
            summary: Default::default(),
        };

        if outcome.hard_splits > 0 {
            record.add_flag(StatusFlag::HardSplit);
        }
        if !record.failed_chunks.is_empty() {
            record.add_flag(StatusFlag::ChunkFailed);
        }
        if partials.iter().any(|p| !p.unclear.is_empty()) {
            record.add_flag(StatusFlag::UnclearPassages);
        }

        match merge(
            self.generator.as_ref(),
            self.counter.as_ref(),
            doc.date,
            &partials,
            total,
            &self.merge_settings,
        )
        .await
        {
            Some(merged) => {
                record.summary = merged.summary;
                for flag in merged.flags {
                    record.add_flag(flag);
                }
                if record.flags.iter().any(StatusFlag::is_degrading) {
                    record.status = RecordStatus::Partial;
                }
            }
            None => {
                warn!(chunks = total, "every chunk failed; recording as unprocessable");
                record.status = RecordStatus::Unprocessable;
            }
        }

        record
    }

    /// Summarize all chunks at once and recombine the results by index.
    async fn summarize_concurrent(&self, doc: &SourceDocument, chunks: Vec<Chunk>) -> Vec<ChunkResult> {
        let total = chunks.len();
        let mut set = JoinSet::new();

        for chunk in chunks {
            let generator = Arc::clone(&self.generator);
            let constraints = self.constraints;
            let context = ChunkContext::for_chunk(doc.date, &chunk, None);
            let span = info_span!("chunk", chunk_index = chunk.index);
            set.spawn(
                async move {
                    let result = summarize(generator.as_ref(), &chunk, &context, &constraints).await;
                    (chunk.index, result)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<ChunkResult>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "chunk task did not complete"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(SummarizeError::Generation(GenerationError::Fatal(
                        "summarization task aborted".to_string(),
                    )))
                })
            })
            .collect()
    }

    /// Summarize chunks in order, giving each the previous chunk's synopsis.
    async fn summarize_chained(&self, doc: &SourceDocument, chunks: &[Chunk]) -> Vec<ChunkResult> {
        let mut results: Vec<ChunkResult> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let previous = results
                .last()
                .and_then(|r| r.as_ref().ok())
                .map(|p| p.synopsis.clone());
            let context = ChunkContext::for_chunk(doc.date, chunk, previous);
            let span = info_span!("chunk", chunk_index = chunk.index);
            let result = summarize(self.generator.as_ref(), chunk, &context, &self.constraints)
                .instrument(span)
                .await;
            results.push(result);
        }
        results
    }

    async fn load_and_process(&self, selection: Selection) -> DocumentRecord {
        let fallback = unread_document(&selection);
        // pdf-extract is CPU-bound and may panic on malformed files.
        let doc = match tokio::task::spawn_blocking(move || load_document(&selection)).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "text extraction task failed");
                fallback
            }
        };
        self.process_document(&doc).await
    }

    /// Run [`Self::load_and_process`] on its own task so that a panic still
    /// yields an `unprocessable` row under the document's key.
    async fn process_guarded(self: Arc<Self>, selection: Selection) -> DocumentRecord {
        let placeholder = unread_document(&selection);
        let pipeline = Arc::clone(&self);
        let task = tokio::spawn(
            async move { pipeline.load_and_process(selection).await }.in_current_span(),
        );
        match task.await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "document processing aborted; recording as unprocessable");
                DocumentRecord::unprocessable(
                    &placeholder,
                    StatusFlag::ProcessingFailed,
                    String::new(),
                )
            }
        }
    }

    /// Process `selections` with bounded document concurrency, writing each
    /// record as it completes. Once `cancel` is set no new documents start;
    /// those already running finish and are stored.
    pub async fn run(
        self: &Arc<Self>,
        selections: Vec<Selection>,
        store: &CsvStore,
        cancel: &AtomicBool,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch", run_id = %run_id);
        self.run_batch(selections, store, cancel, progress)
            .instrument(span)
            .await
    }

    async fn run_batch(
        self: &Arc<Self>,
        selections: Vec<Selection>,
        store: &CsvStore,
        cancel: &AtomicBool,
        progress: &dyn ProgressReporter,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let total = selections.len() as u64;
        let mut report = BatchReport {
            found: selections.len(),
            ..Default::default()
        };
        info!(documents = report.found, "batch started");

        let mut pending = selections.into_iter();
        let mut set = JoinSet::new();
        let mut done = 0u64;

        loop {
            while set.len() < self.document_concurrency && !cancel.load(Ordering::SeqCst) {
                let Some(selection) = pending.next() else {
                    break;
                };
                if store.contains(selection.date, &selection.source_filename).await {
                    debug!(
                        date = %selection.date,
                        file = %selection.source_filename,
                        "already stored; skipping"
                    );
                    report.skipped += 1;
                    done += 1;
                    progress.report(ProgressEvent::Summarizing {
                        document: format!("{}/{}", selection.date, selection.source_filename),
                        n: done,
                        total,
                    });
                    continue;
                }

                let pipeline = Arc::clone(self);
                let span = info_span!(
                    "document",
                    date = %selection.date,
                    file = %selection.source_filename
                );
                set.spawn(pipeline.process_guarded(selection).instrument(span));
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            done += 1;
            match joined {
                Ok(record) => {
                    store.write(&record).await?;
                    info!(
                        date = %record.date,
                        file = %record.source_filename,
                        status = %record.status,
                        chunks = record.chunk_count,
                        failed = record.failed_chunks.len(),
                        "document recorded"
                    );
                    report.count(&record);
                    progress.report(ProgressEvent::Summarizing {
                        document: format!("{}/{}", record.date, record.source_filename),
                        n: done,
                        total,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "document task did not complete");
                    report.unprocessable += 1;
                }
            }
        }

        report.cancelled = pending.count();
        if report.cancelled > 0 {
            warn!(remaining = report.cancelled, "interrupted; remaining documents not started");
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

/// A selection whose text was never read.
fn unread_document(selection: &Selection) -> SourceDocument {
    SourceDocument {
        date: selection.date,
        source_filename: selection.source_filename.clone(),
        path: selection.paths.first().cloned().unwrap_or_default(),
        text: String::new(),
        valid: false,
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `archivist summarize`: discover, filter, and summarize into the store.
///
/// With `dry_run`, prints document and estimated chunk counts without
/// opening the store or calling the generation service.
pub async fn run_summarize(
    config: &Config,
    filter: &SourceFilter,
    dry_run: bool,
    progress: &dyn ProgressReporter,
    cancel: &AtomicBool,
) -> Result<BatchReport> {
    progress.report(ProgressEvent::Discovering {
        input_dir: config.paths.input_dir.display().to_string(),
    });
    let precedence = MarkerPrecedence::new(&config.selection.prefer_markers);
    let discovery = discover(&config.paths.input_dir, &config.selection, &precedence)?;
    let superseded = discovery.superseded.len();
    let selections = filter.apply(discovery.selected);
    let counter = create_counter(&config.chunking)?;

    if dry_run {
        let mut estimated_chunks = 0usize;
        let mut unreadable = 0usize;
        for selection in &selections {
            let doc = load_document(selection);
            if !doc.valid {
                unreadable += 1;
                continue;
            }
            let document_id = doc.document_id();
            estimated_chunks += chunk_text(&document_id, &doc.text, config.chunking.max_tokens, counter.as_ref())
                .chunks
                .len();
        }
        println!("summarize (dry-run)");
        println!("  documents found: {}", selections.len());
        println!("  superseded sources: {}", superseded);
        println!("  unreadable: {}", unreadable);
        println!("  estimated chunks: {}", estimated_chunks);
        return Ok(BatchReport {
            found: selections.len(),
            ..Default::default()
        });
    }

    let store = CsvStore::open(&config.paths.summaries_csv)?;
    if !config.generation.is_enabled() {
        warn!("generation provider is disabled; documents will be recorded as unprocessable");
    }
    let provider = create_generator(&config.generation)?;
    let dispatcher = Arc::new(Dispatcher::from_config(provider, &config.generation));
    let pipeline = Arc::new(Pipeline::new(dispatcher.clone(), counter, config));

    let report = pipeline.run(selections, &store, cancel, progress).await?;
    let stats = dispatcher.stats();

    println!("summarize");
    println!("  documents found: {}", report.found);
    println!("  superseded sources: {}", superseded);
    println!("  skipped (already stored): {}", report.skipped);
    println!("  processed: {}", report.processed());
    println!("    ok: {}", report.ok);
    println!("    partial: {}", report.partial);
    println!("    unprocessable: {}", report.unprocessable);
    if report.cancelled > 0 {
        println!("  not started (interrupted): {}", report.cancelled);
    }
    println!(
        "  generation calls: {} ({} retries, {} rate limited, {} timeouts)",
        stats.calls, stats.retries, stats.rate_limited, stats.timeouts
    );
    println!("  elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!("  output: {}", store.path().display());
    println!("{}", if report.has_failures() { "partial failure" } else { "ok" });

    Ok(report)
}

/// `archivist chunk`: print the chunk boundaries of one file.
pub fn run_chunk_preview(path: &Path, max_tokens: usize, counter: &dyn TokenCounter) -> Result<()> {
    let text = extract_file(path)?;
    let document_id = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let outcome = chunk_text(&document_id, &text, max_tokens, counter);

    println!(
        "{}: {} chunks (max {} tokens, {} counter, {} hard splits)",
        document_id,
        outcome.chunks.len(),
        max_tokens,
        counter.name(),
        outcome.hard_splits
    );
    for chunk in &outcome.chunks {
        let preview: String = chunk
            .text
            .chars()
            .take(PREVIEW_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        println!(
            "  [{:>3}] {:>6} tokens  {}",
            chunk.index,
            counter.count(&chunk.text),
            preview
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::mock::MockGenerator;
    use crate::generate::Prompt;
    use crate::progress::NoProgress;
    use crate::tokenize::HeuristicCounter;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    const CONFIG: &str = r#"
[paths]
input_dir = "./minutes"
summaries_csv = "./summaries.csv"

[chunking]
max_tokens = 30

[generation]
merge_budget_tokens = 100000
"#;

    fn config() -> Config {
        toml::from_str(CONFIG).unwrap()
    }

    fn doc(text: &str) -> SourceDocument {
        SourceDocument {
            date: NaiveDate::from_ymd_opt(1973, 1, 15).unwrap(),
            source_filename: "1973-01-15_ocr.pdf".into(),
            path: PathBuf::from("1973-01-15_ocr.pdf"),
            text: text.into(),
            valid: true,
        }
    }

    fn pipeline(generator: Arc<dyn TextGenerator>, config: &Config) -> Pipeline {
        Pipeline::new(generator, Arc::new(HeuristicCounter), config)
    }

    fn part_of(prompt: &Prompt) -> Option<usize> {
        let rest = prompt.user.split("This is part ").nth(1)?;
        rest.split(' ').next()?.parse().ok()
    }

    /// Chunk prompts get a summary naming their part; merge prompts get a synopsis.
    fn scripted(prompt: &Prompt) -> Result<String, GenerationError> {
        match part_of(prompt) {
            Some(part) => Ok(format!(
                "SYNOPSIS: Part {part} happened.\nDETAIL: Detail of part {part}.\nKEY NOTES:\n- Note {part}\n- Shared note"
            )),
            None => Ok("SYNOPSIS: The whole meeting happened.".to_string()),
        }
    }

    const THREE_SENTENCES: &str = "The board met in regular session at the high school library. \
        The treasurer presented the monthly report on the building fund. \
        The meeting was adjourned by the chairman at nine o'clock.";

    #[tokio::test]
    async fn test_single_chunk_document_is_ok_without_merge_call() {
        let generator = Arc::new(MockGenerator::new(scripted));
        let mut config = config();
        config.chunking.max_tokens = 3000;
        let record = pipeline(generator.clone(), &config)
            .process_document(&doc(THREE_SENTENCES))
            .await;

        assert_eq!(record.status, RecordStatus::Ok);
        assert_eq!(record.chunk_count, 1);
        assert_eq!(generator.calls(), 1);
        assert_eq!(record.summary.synopsis, "Part 1 happened.");
        assert_eq!(record.source_sha256, sha256_hex(THREE_SENTENCES));
    }

    #[tokio::test]
    async fn test_multi_chunk_document_merges_in_order() {
        let generator = Arc::new(MockGenerator::new(scripted));
        let record = pipeline(generator.clone(), &config())
            .process_document(&doc(THREE_SENTENCES))
            .await;

        assert_eq!(record.chunk_count, 3);
        assert_eq!(record.status, RecordStatus::Ok);
        assert!(record.flags.is_empty());
        assert_eq!(generator.calls(), 4);
        assert_eq!(record.summary.synopsis, "The whole meeting happened.");
        assert_eq!(
            record.summary.key_notes,
            vec!["Note 1", "Shared note", "Note 2", "Note 3"]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_recorded_and_document_partial() {
        let generator = Arc::new(MockGenerator::new(|prompt: &Prompt| {
            if part_of(prompt) == Some(2) {
                Ok("I cannot summarize this.".to_string())
            } else {
                scripted(prompt)
            }
        }));
        let record = pipeline(generator, &config())
            .process_document(&doc(THREE_SENTENCES))
            .await;

        assert_eq!(record.status, RecordStatus::Partial);
        assert_eq!(record.failed_chunks, vec![1]);
        assert_eq!(record.flags, vec![StatusFlag::ChunkFailed]);
        assert!(record.summary.detail.contains("[Part 1/3]"));
        assert!(record.summary.detail.contains("[Part 3/3]"));
        assert!(!record.summary.detail.contains("[Part 2/3]"));
    }

    #[tokio::test]
    async fn test_all_chunks_failed_is_unprocessable() {
        let generator = Arc::new(MockGenerator::new(|_| {
            Err(GenerationError::Fatal("401".into()))
        }));
        let record = pipeline(generator, &config())
            .process_document(&doc(THREE_SENTENCES))
            .await;

        assert_eq!(record.status, RecordStatus::Unprocessable);
        assert_eq!(record.failed_chunks, vec![0, 1, 2]);
        assert_eq!(record.flags, vec![StatusFlag::ChunkFailed]);
    }

    #[tokio::test]
    async fn test_empty_and_unreadable_documents() {
        let generator = Arc::new(MockGenerator::new(scripted));
        let pipeline = pipeline(generator.clone(), &config());

        let empty = pipeline.process_document(&doc(" \n\n ")).await;
        assert_eq!(empty.status, RecordStatus::Unprocessable);
        assert_eq!(empty.flags, vec![StatusFlag::EmptyText]);

        let mut unreadable = doc("");
        unreadable.valid = false;
        let record = pipeline.process_document(&unreadable).await;
        assert_eq!(record.flags, vec![StatusFlag::UnreadableSource]);

        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_unclear_passages_flag_does_not_degrade() {
        let generator = Arc::new(MockGenerator::new(|_| {
            Ok("SYNOPSIS: s\nDETAIL: d\nKEY NOTES:\n- n\nUNCLEAR:\n- page torn".to_string())
        }));
        let mut config = config();
        config.chunking.max_tokens = 3000;
        let record = pipeline(generator, &config)
            .process_document(&doc(THREE_SENTENCES))
            .await;
        assert_eq!(record.status, RecordStatus::Ok);
        assert_eq!(record.flags, vec![StatusFlag::UnclearPassages]);
    }

    #[tokio::test]
    async fn test_chained_context_passes_previous_synopsis() {
        let generator = Arc::new(MockGenerator::new(scripted));
        let mut config = config();
        config.pipeline.chain_context = true;
        pipeline(generator.clone(), &config)
            .process_document(&doc(THREE_SENTENCES))
            .await;

        let prompts = generator.prompts.lock().unwrap();
        assert!(!prompts[0].user.contains("previous part"));
        assert!(prompts[1].user.contains("Part 1 happened."));
        assert!(prompts[2].user.contains("Part 2 happened."));
    }

    /// Answers later parts first: part `n` of 3 waits `(4 - n) * 30ms`.
    struct SlowEarlyParts {
        finished: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl TextGenerator for SlowEarlyParts {
        fn model_name(&self) -> &str {
            "slow-early-parts"
        }

        async fn generate(
            &self,
            prompt: &Prompt,
            _constraints: &Constraints,
        ) -> Result<String, GenerationError> {
            if let Some(part) = part_of(prompt) {
                tokio::time::sleep(Duration::from_millis((4 - part as u64) * 30)).await;
                self.finished.lock().unwrap().push(part);
            }
            scripted(prompt)
        }
    }

    #[tokio::test]
    async fn test_chunks_finishing_out_of_order_keep_index_order() {
        let generator = Arc::new(SlowEarlyParts {
            finished: std::sync::Mutex::new(Vec::new()),
        });
        let record = pipeline(generator.clone(), &config())
            .process_document(&doc(THREE_SENTENCES))
            .await;

        assert_eq!(*generator.finished.lock().unwrap(), vec![3, 2, 1]);
        assert_eq!(record.status, RecordStatus::Ok);
        assert_eq!(
            record.summary.key_notes,
            vec!["Note 1", "Shared note", "Note 2", "Note 3"]
        );
        let detail = &record.summary.detail;
        let first = detail.find("[Part 1/3]").unwrap();
        let second = detail.find("[Part 2/3]").unwrap();
        let third = detail.find("[Part 3/3]").unwrap();
        assert!(first < second && second < third);
        assert!(detail.starts_with("[Part 1/3]\nDetail of part 1."));
    }

    #[tokio::test]
    async fn test_panicking_document_still_gets_a_row() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("1973-01-15_ocr.txt");
        std::fs::write(&path, THREE_SENTENCES).unwrap();
        let selection = Selection {
            date: NaiveDate::from_ymd_opt(1973, 1, 15).unwrap(),
            source_filename: "1973-01-15_ocr.txt".into(),
            paths: vec![path],
        };

        let generator = Arc::new(MockGenerator::new(|prompt: &Prompt| {
            if part_of(prompt).is_none() {
                panic!("condensing call blew up");
            }
            scripted(prompt)
        }));
        let store = CsvStore::open(&tmp.path().join("summaries.csv")).unwrap();
        let pipeline = Arc::new(pipeline(generator, &config()));
        let report = pipeline
            .run(vec![selection], &store, &AtomicBool::new(false), &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.unprocessable, 1);
        let records = store.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_filename, "1973-01-15_ocr.txt");
        assert_eq!(records[0].status, RecordStatus::Unprocessable);
        assert_eq!(records[0].flags, vec![StatusFlag::ProcessingFailed]);
    }
}
