//! Configuration loading for litlink.
//! Reads litlink.toml from the current directory or the path in LITLINK_CONFIG.
//! A missing file is not an error: every section has defaults.

use litlink_common::{LitlinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "LITLINK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "litlink.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LitlinkConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub linkage: LinkageConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// 1 runs sources one after another; larger values allow that many
    /// connector calls in flight at once.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_sources: usize,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    /// Deduplicate each source's list before the cross-source pass.
    #[serde(default)]
    pub per_source_dedup_first: bool,
}

fn default_concurrency() -> usize { 1 }
fn default_max_results() -> usize { 50 }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: default_concurrency(),
            default_max_results: default_max_results(),
            per_source_dedup_first: false,
        }
    }
}

// ── Record linkage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkageConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "bool_true")]
    pub use_doi: bool,
    #[serde(default = "bool_true")]
    pub use_title_hash: bool,
    #[serde(default = "bool_true")]
    pub use_fuzzy: bool,
    #[serde(default)]
    pub use_author_overlap: bool,
    #[serde(default = "default_author_overlap_min")]
    pub author_overlap_min: f64,
}

fn default_similarity_threshold() -> f64 { 0.95 }
fn default_author_overlap_min()   -> f64 { 0.5 }
fn bool_true()                    -> bool { true }

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            use_doi: true,
            use_title_hash: true,
            use_fuzzy: true,
            use_author_overlap: false,
            author_overlap_min: default_author_overlap_min(),
        }
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_formats()    -> Vec<String> { vec!["json".to_string()] }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            formats: default_formats(),
        }
    }
}

// ── Sources ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub crossref: SourceConfig,
    #[serde(default)]
    pub europepmc: SourceConfig,
    #[serde(default)]
    pub pubmed: SourceConfig,
    #[serde(default = "default_arxiv")]
    pub arxiv: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            crossref: SourceConfig::default(),
            europepmc: SourceConfig::default(),
            pubmed: SourceConfig::default(),
            arxiv: default_arxiv(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Minimum delay between two requests issued by the same connector.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Contact address for polite-pool APIs (CrossRef).
    pub mailto: Option<String>,
    /// API key where the source supports one (NCBI).
    pub api_key: Option<String>,
}

fn default_min_interval_ms() -> u64 { 100 }
fn default_timeout_secs()    -> u64 { 30 }
fn default_max_retries()     -> u32 { 3 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: default_min_interval_ms(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            mailto: None,
            api_key: None,
        }
    }
}

// arXiv asks clients to wait three seconds between calls.
fn default_arxiv() -> SourceConfig {
    SourceConfig {
        min_interval_ms: 3_000,
        ..SourceConfig::default()
    }
}


impl LitlinkConfig {
    /// Load configuration from litlink.toml.
    /// Checks LITLINK_CONFIG env var first, then the current directory,
    /// then falls back to defaults. Environment overrides are applied last.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = std::env::var(CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let mut config = if Path::new(&path).exists() {
            info!(path = %path, "Loading configuration");
            Self::load_from(&path)?
        } else {
            debug!(path = %path, "No config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a specific TOML file without touching the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| LitlinkError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LitlinkConfig =
            toml::from_str(content).map_err(|e| LitlinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("LITLINK_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }
        if let Ok(mailto) = std::env::var("LITLINK_MAILTO") {
            self.sources.crossref.mailto = Some(mailto);
        }
        if let Ok(key) = std::env::var("LITLINK_NCBI_API_KEY") {
            self.sources.pubmed.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.linkage.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LitlinkError::Config(format!(
                "linkage.similarity_threshold must be within [0, 1], got {threshold}"
            )));
        }
        let overlap = self.linkage.author_overlap_min;
        if !(0.0..=1.0).contains(&overlap) {
            return Err(LitlinkError::Config(format!(
                "linkage.author_overlap_min must be within [0, 1], got {overlap}"
            )));
        }
        if self.orchestrator.max_concurrent_sources == 0 {
            return Err(LitlinkError::Config(
                "orchestrator.max_concurrent_sources must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.default_max_results == 0 {
            return Err(LitlinkError::Config(
                "orchestrator.default_max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
