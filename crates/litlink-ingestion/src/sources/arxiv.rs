//! arXiv Atom API connector.
//!
//! Endpoint: https://export.arxiv.org/api/query
//! The API has no date filter on free-text search, so year ranges are
//! applied to the parsed entries.

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use litlink_config::SourceConfig;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{SearchRequest, SourceConnector, SourceError, SourceKind, USER_AGENT};
use crate::http::PacedClient;
use crate::models::{Author, PublicationRecord, RecordDraft};

const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
const ARXIV_MAX_RESULTS: usize = 2000;

pub struct ArxivConnector {
    client: PacedClient,
}

impl ArxivConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: PacedClient::new(SourceKind::Arxiv.as_str(), config, USER_AGENT)?,
        })
    }
}

#[async_trait]
impl SourceConnector for ArxivConnector {
    fn name(&self) -> &str {
        SourceKind::Arxiv.as_str()
    }

    #[instrument(skip(self), fields(query = %request.query))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        let params = [
            ("search_query", format!("all:{}", request.query.trim())),
            ("start", "0".to_string()),
            ("max_results", request.max_results.min(ARXIV_MAX_RESULTS).to_string()),
            ("sortBy", "relevance".to_string()),
        ];
        let xml = self.client.get_text(ARXIV_API_URL, &params).await?;

        let records: Vec<_> = parse_atom_response(&xml)?
            .into_iter()
            .filter(|r| request.accepts_year(r.year))
            .collect();
        debug!(n = records.len(), "arXiv search results after year filter");
        Ok(records)
    }
}

// ── Atom feed ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "arxiv:journal_ref", alias = "journal_ref")]
    journal_ref: Option<String>,
    #[serde(rename = "arxiv:doi", alias = "doi")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: String,
    #[serde(rename = "arxiv:affiliation", alias = "affiliation")]
    affiliation: Option<String>,
}

fn parse_atom_response(xml: &str) -> Result<Vec<PublicationRecord>, SourceError> {
    let feed: AtomFeed =
        from_str(xml).map_err(|e| SourceError::Parse(format!("invalid atom xml: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| PublicationRecord::ingest(entry_to_draft(entry)))
        .collect())
}

fn entry_to_draft(entry: AtomEntry) -> RecordDraft {
    let year = entry
        .published
        .as_deref()
        .and_then(|p| DateTime::parse_from_rfc3339(p.trim()).ok())
        .map(|dt| dt.year());

    RecordDraft {
        title: entry.title.map(|t| clean_text(&t)),
        abstract_text: entry.summary.map(|s| clean_text(&s)),
        authors: entry
            .authors
            .into_iter()
            .map(|a| Author {
                name: clean_text(&a.name),
                affiliation: a.affiliation.map(|v| clean_text(&v)).filter(|v| !v.is_empty()),
                orcid: None,
            })
            .collect(),
        doi: entry.doi.map(|d| d.trim().to_string()),
        year,
        journal: entry.journal_ref.map(|j| clean_text(&j)),
        source: SourceKind::Arxiv.as_str().to_string(),
        url: entry.id.map(|i| i.trim().to_string()),
        citation_count: None,
    }
}

fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
