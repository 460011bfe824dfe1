//! # Archivist CLI (`archivist`)
//!
//! Batch summarization of meeting minutes and the attendance join.
//!
//! ## Usage
//!
//! ```bash
//! archivist --config ./config/archivist.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `archivist sources` | List the source selected for each meeting date |
//! | `archivist summarize` | Summarize selected sources into the summaries CSV |
//! | `archivist join` | Join the summaries CSV with attendance into the merged CSV |
//! | `archivist chunk <file>` | Preview how one file would be chunked |
//!
//! ## Exit status
//!
//! `0` success, `2` partial failure (a document was unprocessable, or an
//! attendance or summaries row was excluded from the join), `1` hard failure.

use archivist::attendance;
use archivist::config::{self, Config};
use archivist::logging;
use archivist::pipeline;
use archivist::progress::ProgressMode;
use archivist::sources::{self, SourceFilter};
use archivist::tokenize::{self, HeuristicCounter, TokenCounter};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Default chunk budget for `chunk` when no configuration is available.
const DEFAULT_PREVIEW_TOKENS: usize = 3000;

/// Archivist: chunked summarization of historical meeting minutes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/archivist.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "archivist",
    about = "Archivist: chunked summarization of historical meeting minutes",
    version,
    long_about = "Archivist turns searchable PDFs and transcripts of meeting minutes into \
    structured archival records (synopsis, detail, key notes) keyed by meeting date, and joins \
    them with attendance records."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/archivist.toml")]
    config: PathBuf,

    /// Log level or filter directive (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the source selected for each meeting date.
    ///
    /// Shows which file wins for each date after backup filtering and
    /// precedence, and which files were superseded.
    Sources,

    /// Summarize selected sources into the summaries CSV.
    ///
    /// Documents already present in the CSV are skipped, so an interrupted
    /// run can simply be restarted. Ctrl-C stops new documents from starting;
    /// documents in flight are finished and written.
    Summarize {
        /// Only meetings on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Only meetings on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Only this source file name. May be repeated.
        #[arg(long = "file")]
        files: Vec<String>,

        /// Show document and estimated chunk counts without calling the service.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Join the summaries CSV with attendance into the merged CSV.
    Join {
        /// Attendance CSV. Defaults to `paths.attendance_csv`.
        #[arg(long)]
        attendance: Option<PathBuf>,

        /// Output CSV. Defaults to `paths.merged_csv`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Preview how one file would be chunked.
    Chunk {
        /// A PDF, .txt, or .md file.
        file: PathBuf,

        /// Token budget per chunk. Defaults to `chunking.max_tokens`.
        #[arg(long)]
        max_tokens: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&cli.log_level, cli.log_json) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // `chunk` works without a config file.
    if let Commands::Chunk { file, max_tokens } = &cli.command {
        let (budget, counter): (usize, Arc<dyn TokenCounter>) =
            match config::load_config(&cli.config) {
                Ok(cfg) => (cfg.chunking.max_tokens, tokenize::create_counter(&cfg.chunking)?),
                Err(_) => (DEFAULT_PREVIEW_TOKENS, Arc::new(HeuristicCounter)),
            };
        let budget = max_tokens.unwrap_or(budget);
        if budget == 0 {
            anyhow::bail!("--max-tokens must be > 0");
        }
        pipeline::run_chunk_preview(file, budget, counter.as_ref())?;
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            sources::list_sources(&cfg)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Summarize {
            since,
            until,
            limit,
            files,
            dry_run,
            progress,
        } => {
            let filter = SourceFilter {
                since,
                until,
                limit,
                files,
            };
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing documents in flight");
                    flag.store(true, Ordering::SeqCst);
                }
            });

            let report =
                pipeline::run_summarize(&cfg, &filter, dry_run, reporter.as_ref(), &cancel).await?;
            Ok(exit_code(report.has_failures()))
        }
        Commands::Join { attendance, output } => run_join(&cfg, attendance, output),
        Commands::Chunk { .. } => unreachable!("handled before config loading"),
    }
}

fn run_join(
    cfg: &Config,
    attendance: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let Some(attendance_csv) = attendance.or_else(|| cfg.paths.attendance_csv.clone()) else {
        anyhow::bail!("No attendance CSV: pass --attendance or set paths.attendance_csv");
    };
    let Some(merged_csv) = output.or_else(|| cfg.paths.merged_csv.clone()) else {
        anyhow::bail!("No output CSV: pass --output or set paths.merged_csv");
    };

    let report = attendance::run_join(
        &cfg.paths.summaries_csv,
        &attendance_csv,
        &merged_csv,
        &cfg.attendance,
    )?;

    println!("join");
    println!("  records: {}", report.records);
    println!("  with attendance: {}", report.with_attendance);
    println!("  attendance rows: {}", report.attendance_rows);
    println!("  excluded rows (unparseable date): {}", report.excluded_rows);
    println!("  excluded summaries rows (unreadable): {}", report.excluded_summaries);
    println!("  output: {}", merged_csv.display());
    let failed = report.has_exclusions();
    println!("{}", if failed { "partial failure" } else { "ok" });

    Ok(exit_code(failed))
}

fn exit_code(partial_failure: bool) -> ExitCode {
    if partial_failure {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
