//! # Archivist
//!
//! Chunked summarization of historical meeting minutes into structured
//! archival records, joined with attendance by meeting date.
//!
//! Archivist reads a collection of searchable PDFs and speech-to-text
//! transcripts, splits each meeting's text into model-sized chunks,
//! summarizes every chunk through a text-generation service, merges the
//! partial summaries into one synopsis, detail, and key-note list per
//! meeting, and appends the result to a CSV table. A separate step joins that
//! table with an attendance roster.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌───────────┐
//! │  Sources    │──▶│   Chunker    │──▶│ Summarizer │──▶│   Merge   │
//! │ PDF / text  │   │ normalize+cut│   │ per chunk  │   │  reducer  │
//! └─────────────┘   └──────────────┘   └─────┬──────┘   └─────┬─────┘
//!                                            │                │
//!                                     ┌──────▼──────┐   ┌─────▼─────┐
//!                                     │ Dispatcher  │   │ CSV store │
//!                                     │ retry+limit │   └─────┬─────┘
//!                                     └─────────────┘         │
//!                                                       ┌─────▼─────┐
//!                                     attendance.csv ──▶│   Join    │
//!                                                       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! archivist sources                       # list what would be summarized
//! archivist summarize --dry-run           # estimate chunk counts
//! archivist summarize --since 1973-01-01  # summarize into summaries.csv
//! archivist join                          # merge with attendance
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | OCR cleanup before chunking |
//! | [`tokenize`] | Token counting |
//! | [`chunk`] | Sentence-boundary chunking |
//! | [`generate`] | Text-generation provider abstraction |
//! | [`dispatch`] | Retry, backoff, and concurrency cap for generation calls |
//! | [`summarize`] | Per-chunk prompt and response parsing |
//! | [`merge`] | Partial summaries → document summary |
//! | [`sources`] | Discovery, date keys, precedence |
//! | [`extract`] | PDF and text extraction |
//! | [`pipeline`] | Document records and batch runs |
//! | [`store`] | Idempotent CSV store |
//! | [`attendance`] | Attendance join |
//! | [`error`] | Typed errors for generation, parsing, and extraction |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | Tracing subscriber setup |

pub mod attendance;
pub mod chunk;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod generate;
pub mod logging;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod sources;
pub mod store;
pub mod summarize;
pub mod tokenize;
