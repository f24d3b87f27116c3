//! CrossRef works search.
//!
//! API: https://api.crossref.org/works
//! Polite pool: pass `mailto` when configured (see CrossRef etiquette).

use async_trait::async_trait;
use litlink_config::SourceConfig;
use tracing::{debug, instrument};

use super::{strip_markup, SearchRequest, SourceConnector, SourceError, SourceKind, USER_AGENT};
use crate::http::PacedClient;
use crate::models::{Author, PublicationRecord, RecordDraft, YearRange};

const CR_SEARCH_URL: &str = "https://api.crossref.org/works";
const CR_MAX_ROWS: usize = 1000;
const CR_SELECT: &str =
    "DOI,title,abstract,author,container-title,published,issued,URL,is-referenced-by-count";

pub struct CrossRefConnector {
    client: PacedClient,
    mailto: Option<String>,
}

impl CrossRefConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: PacedClient::new(SourceKind::CrossRef.as_str(), config, USER_AGENT)?,
            mailto: config.mailto.clone(),
        })
    }
}

#[async_trait]
impl SourceConnector for CrossRefConnector {
    fn name(&self) -> &str {
        SourceKind::CrossRef.as_str()
    }

    #[instrument(skip(self), fields(query = %request.query))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        let mut params = vec![
            ("query", request.query.trim().to_string()),
            ("rows", request.max_results.min(CR_MAX_ROWS).to_string()),
            ("select", CR_SELECT.to_string()),
        ];
        if let Some(filter) = request.year_range.as_ref().and_then(date_filter) {
            params.push(("filter", filter));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let body: serde_json::Value = self.client.get_json(CR_SEARCH_URL, &params).await?;
        let records = parse_works(&body)?;
        debug!(n = records.len(), "CrossRef search results");
        Ok(records)
    }
}

fn date_filter(range: &YearRange) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(from) = range.from {
        parts.push(format!("from-pub-date:{from}-01-01"));
    }
    if let Some(to) = range.to {
        parts.push(format!("until-pub-date:{to}-12-31"));
    }
    if parts.is_empty() { None } else { Some(parts.join(",")) }
}

// ── Conversion ─────────────────────────────────────────────────────────────

fn parse_works(body: &serde_json::Value) -> Result<Vec<PublicationRecord>, SourceError> {
    let items = body["message"]["items"]
        .as_array()
        .ok_or_else(|| SourceError::Parse("CrossRef response has no message.items".to_string()))?;
    Ok(items
        .iter()
        .filter_map(|w| PublicationRecord::ingest(work_to_draft(w)))
        .collect())
}

fn work_to_draft(work: &serde_json::Value) -> RecordDraft {
    let title = work["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .map(String::from);

    let authors = work["author"]
        .as_array()
        .map(|list| {
            list.iter()
                .map(|a| {
                    let given = a["given"].as_str().unwrap_or("").trim();
                    let family = a["family"].as_str().unwrap_or("").trim();
                    let name = match (given.is_empty(), family.is_empty()) {
                        (true, _) => family.to_string(),
                        (false, true) => given.to_string(),
                        (false, false) => format!("{given} {family}"),
                    };
                    Author {
                        name,
                        affiliation: a["affiliation"]
                            .as_array()
                            .and_then(|af| af.first())
                            .and_then(|af| af["name"].as_str())
                            .map(String::from),
                        orcid: a["ORCID"].as_str().map(String::from),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let year = year_of(&work["published"]).or_else(|| year_of(&work["issued"]));

    RecordDraft {
        title,
        abstract_text: work["abstract"].as_str().map(strip_markup),
        authors,
        doi: work["DOI"].as_str().map(String::from),
        year,
        journal: work["container-title"]
            .as_array()
            .and_then(|j| j.first())
            .and_then(|j| j.as_str())
            .map(String::from),
        source: SourceKind::CrossRef.as_str().to_string(),
        url: work["URL"].as_str().map(String::from),
        citation_count: work["is-referenced-by-count"].as_u64(),
    }
}

fn year_of(date: &serde_json::Value) -> Option<i32> {
    date["date-parts"]
        .as_array()?
        .first()?
        .as_array()?
        .first()?
        .as_i64()
        .map(|y| y as i32)
}
