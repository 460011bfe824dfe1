//! Tracing subscriber setup.
//!
//! Logs go to stderr so the run summaries printed on stdout stay parseable.
//! `RUST_LOG` (or `ARCHIVIST_LOG`) overrides the level chosen on the command
//! line; `--log-json` switches to one JSON object per line with span
//! open/close events, for collecting batch runs.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `level` is a bare level (`info`) or a
/// full filter directive (`archivist=debug,reqwest=warn`).
pub fn init_logging(level: &str, log_json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("ARCHIVIST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(directive(level)));

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    }

    Ok(())
}

fn directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("archivist={}", level)
    }
}
