use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Root of the archival collection (searchable PDFs, transcripts).
    pub input_dir: PathBuf,
    /// Tabular store of document summaries.
    pub summaries_csv: PathBuf,
    #[serde(default)]
    pub attendance_csv: Option<PathBuf>,
    #[serde(default)]
    pub merged_csv: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Filename markers in descending precedence. A file whose stem carries an
    /// earlier marker wins over one with a later marker or none.
    #[serde(default = "default_prefer_markers")]
    pub prefer_markers: Vec<String>,
    #[serde(default = "default_true")]
    pub skip_backups: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            prefer_markers: default_prefer_markers(),
            skip_backups: true,
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}
fn default_prefer_markers() -> Vec<String> {
    vec!["_ocr".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    /// `"heuristic"` or a path to a `tokenizer.json`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_tokenizer() -> String {
    "heuristic".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key. Read once at startup.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Global cap on in-flight generation calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Prompt size above which the merge degrades to short-summary mode.
    #[serde(default = "default_merge_budget_tokens")]
    pub merge_budget_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_concurrency: default_max_concurrency(),
            merge_budget_tokens: default_merge_budget_tokens(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_output_tokens() -> u32 {
    1500
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    4
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_merge_budget_tokens() -> usize {
    6000
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Documents summarized at the same time.
    #[serde(default = "default_document_concurrency")]
    pub document_concurrency: usize,
    /// Summarize a document's chunks one after another, passing each chunk
    /// the previous chunk's synopsis. Off: chunks run concurrently without it.
    #[serde(default)]
    pub chain_context: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            document_concurrency: default_document_concurrency(),
            chain_context: false,
        }
    }
}

fn default_document_concurrency() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttendanceConfig {
    #[serde(default = "default_date_column")]
    pub date_column: String,
    /// Attendee columns to carry into the merge. Empty means every column
    /// other than the date column.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            date_column: default_date_column(),
            fields: Vec::new(),
        }
    }
}

fn default_date_column() -> String {
    "Date".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.generation.max_concurrency == 0 {
        anyhow::bail!("generation.max_concurrency must be >= 1");
    }

    if config.pipeline.document_concurrency == 0 {
        anyhow::bail!("pipeline.document_concurrency must be >= 1");
    }

    if config.generation.merge_budget_tokens < config.chunking.max_tokens {
        anyhow::bail!("generation.merge_budget_tokens must be >= chunking.max_tokens");
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[paths]
input_dir = "./minutes"
summaries_csv = "./out/summaries.csv"

[chunking]
max_tokens = 3000
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.chunking.tokenizer, "heuristic");
        assert_eq!(config.generation.provider, "disabled");
        assert_eq!(config.selection.prefer_markers, vec!["_ocr".to_string()]);
        assert!(config.selection.skip_backups);
        assert_eq!(config.attendance.date_column, "Date");
        assert_eq!(config.pipeline.document_concurrency, 2);
        assert!(!config.pipeline.chain_context);
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let src = MINIMAL.replace("max_tokens = 3000", "max_tokens = 0");
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let src = format!("{}\n[generation]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("generation.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let src = format!(
            "{}\n[generation]\nprovider = \"carrier-pigeon\"\nmodel = \"x\"\n",
            MINIMAL
        );
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_merge_budget_below_chunk_budget_rejected() {
        let src = format!("{}\n[generation]\nmerge_budget_tokens = 100\n", MINIMAL);
        assert!(parse(&src).is_err());
    }
}
