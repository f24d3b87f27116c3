//! Source connectors.
//!
//! Every bibliographic source sits behind [`SourceConnector`]. The
//! orchestrator only sees the trait; the [`ConnectorRegistry`] maps
//! identifier strings such as `"crossref"` to implementations.

pub mod arxiv;
pub mod crossref;
pub mod europepmc;
pub mod pubmed;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use litlink_config::SourcesConfig;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{PublicationRecord, YearRange};

pub const USER_AGENT: &str = concat!("litlink/", env!("CARGO_PKG_VERSION"));

/// One bounded query against a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub year_range: Option<YearRange>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self { query: query.into(), max_results, year_range: None }
    }

    pub fn with_years(mut self, range: YearRange) -> Self {
        if !range.is_unbounded() {
            self.year_range = Some(range);
        }
        self
    }

    /// True when `year` passes the requested range. Records without a
    /// year are kept.
    pub fn accepts_year(&self, year: Option<i32>) -> bool {
        match (self.year_range, year) {
            (Some(range), Some(y)) => range.contains(y),
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {source_name} (retry after {retry_after}s)")]
    RateLimited { source_name: String, retry_after: u64 },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("API error from {url}: {message}")]
    Api { url: String, message: String },
}

/// Contract every source adapter implements.
///
/// "No results" is an empty `Vec`, never an error. Implementations own
/// their pacing and timeouts, so the orchestrator may call different
/// connectors concurrently.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Identifier used in job requests and on produced records.
    fn name(&self) -> &str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError>;
}

/// Built-in connector identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    CrossRef,
    EuropePmc,
    PubMed,
    Arxiv,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::CrossRef,
        SourceKind::EuropePmc,
        SourceKind::PubMed,
        SourceKind::Arxiv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::CrossRef  => "crossref",
            SourceKind::EuropePmc => "europepmc",
            SourceKind::PubMed    => "pubmed",
            SourceKind::Arxiv     => "arxiv",
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Requested ids split into connectors we have and ids we don't.
pub struct Resolved {
    pub known: Vec<Arc<dyn SourceConnector>>,
    pub unknown: Vec<String>,
}

#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn SourceConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in connector enabled in `config`.
    /// A connector whose HTTP client cannot be built is left out.
    pub fn with_defaults(config: &SourcesConfig) -> Self {
        let mut registry = Self::new();
        for kind in SourceKind::ALL {
            let source_config = match kind {
                SourceKind::CrossRef => &config.crossref,
                SourceKind::EuropePmc => &config.europepmc,
                SourceKind::PubMed => &config.pubmed,
                SourceKind::Arxiv => &config.arxiv,
            };
            if !source_config.enabled {
                info!(source = kind.as_str(), "Connector disabled in config");
                continue;
            }
            let built: Result<Arc<dyn SourceConnector>, SourceError> = match kind {
                SourceKind::CrossRef => {
                    crossref::CrossRefConnector::new(source_config).map(|c| Arc::new(c) as _)
                }
                SourceKind::EuropePmc => {
                    europepmc::EuropePmcConnector::new(source_config).map(|c| Arc::new(c) as _)
                }
                SourceKind::PubMed => {
                    pubmed::PubMedConnector::new(source_config).map(|c| Arc::new(c) as _)
                }
                SourceKind::Arxiv => {
                    arxiv::ArxivConnector::new(source_config).map(|c| Arc::new(c) as _)
                }
            };
            match built {
                Ok(connector) => registry.register(connector),
                Err(e) => warn!(source = kind.as_str(), error = %e, "Failed to build connector"),
            }
        }
        registry
    }

    /// Add or replace a connector under its own `name()`.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors.insert(connector.name().to_lowercase(), connector);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.get(&id.trim().to_lowercase()).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Case-insensitive lookup; repeated ids resolve once.
    pub fn resolve(&self, requested: &[String]) -> Resolved {
        let mut known: Vec<Arc<dyn SourceConnector>> = Vec::new();
        let mut unknown = Vec::new();
        for id in requested {
            match self.get(id) {
                Some(c) if known.iter().any(|k| k.name() == c.name()) => {}
                Some(c) => known.push(c),
                None => unknown.push(id.clone()),
            }
        }
        Resolved { known, unknown }
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

lazy_static! {
    static ref MARKUP_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Strip JATS/HTML tags and collapse whitespace.
pub(crate) fn strip_markup(text: &str) -> String {
    MARKUP_TAG
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
