//! Europe PMC REST search.
//!
//! Endpoint: https://www.ebi.ac.uk/europepmc/webservices/rest/search

use async_trait::async_trait;
use litlink_config::SourceConfig;
use tracing::{debug, instrument};

use super::{strip_markup, SearchRequest, SourceConnector, SourceError, SourceKind, USER_AGENT};
use crate::http::PacedClient;
use crate::models::{Author, PublicationRecord, RecordDraft, YearRange};

const EPMC_SEARCH_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";
const EPMC_MAX_PAGE: usize = 1000;

pub struct EuropePmcConnector {
    client: PacedClient,
}

impl EuropePmcConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: PacedClient::new(SourceKind::EuropePmc.as_str(), config, USER_AGENT)?,
        })
    }
}

#[async_trait]
impl SourceConnector for EuropePmcConnector {
    fn name(&self) -> &str {
        SourceKind::EuropePmc.as_str()
    }

    #[instrument(skip(self), fields(query = %request.query))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        let params = [
            ("query", build_query(&request.query, request.year_range.as_ref())),
            ("resultType", "core".to_string()),
            ("pageSize", request.max_results.min(EPMC_MAX_PAGE).to_string()),
            ("format", "json".to_string()),
        ];

        let body: serde_json::Value = self.client.get_json(EPMC_SEARCH_URL, &params).await?;
        let records = parse_results(&body)?;
        debug!(count = records.len(), "Europe PMC search returned results");
        Ok(records)
    }
}

/// Append a `PUB_YEAR` clause; open ends use 1000 and 3000.
fn build_query(query: &str, range: Option<&YearRange>) -> String {
    let query = query.trim();
    match range {
        Some(r) if !r.is_unbounded() => format!(
            "({query}) AND PUB_YEAR:[{} TO {}]",
            r.from.unwrap_or(1000),
            r.to.unwrap_or(3000)
        ),
        _ => query.to_string(),
    }
}

fn parse_results(body: &serde_json::Value) -> Result<Vec<PublicationRecord>, SourceError> {
    let results = body["resultList"]["result"].as_array().ok_or_else(|| {
        SourceError::Parse("Europe PMC response has no resultList.result".to_string())
    })?;
    Ok(results
        .iter()
        .filter_map(|r| PublicationRecord::ingest(result_to_draft(r)))
        .collect())
}

fn result_to_draft(r: &serde_json::Value) -> RecordDraft {
    let authors = r["authorList"]["author"]
        .as_array()
        .map(|list| {
            list.iter()
                .map(|a| Author {
                    name: a["fullName"].as_str().unwrap_or("").to_string(),
                    affiliation: a["authorAffiliationDetailsList"]["authorAffiliation"]
                        .as_array()
                        .and_then(|af| af.first())
                        .and_then(|af| af["affiliation"].as_str())
                        .map(String::from),
                    orcid: a["authorId"]["value"].as_str().map(String::from),
                })
                .collect()
        })
        .unwrap_or_default();

    // pubYear arrives as a string
    let year = r["pubYear"]
        .as_str()
        .and_then(|y| y.trim().parse::<i32>().ok())
        .or_else(|| r["pubYear"].as_i64().map(|y| y as i32));

    let url = r["doi"]
        .as_str()
        .map(|d| format!("https://doi.org/{d}"))
        .or_else(|| {
            r["pmid"]
                .as_str()
                .map(|p| format!("https://europepmc.org/article/MED/{p}"))
        });

    RecordDraft {
        title: r["title"].as_str().map(String::from),
        abstract_text: r["abstractText"].as_str().map(strip_markup),
        authors,
        doi: r["doi"].as_str().map(String::from),
        year,
        journal: r["journalInfo"]["journal"]["title"]
            .as_str()
            .or_else(|| r["journalTitle"].as_str())
            .map(String::from),
        source: SourceKind::EuropePmc.as_str().to_string(),
        url,
        citation_count: r["citedByCount"].as_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_to_record() {
        let body = serde_json::json!({
            "hitCount": 1,
            "resultList": { "result": [{
                "pmid": "12345",
                "doi": "10.1000/epmc",
                "title": "KRAS inhibitors in pancreatic cancer.",
                "abstractText": "Background <i>KRAS</i> is mutated.",
                "authorList": { "author": [{ "fullName": "Doe J", "authorId": { "type": "ORCID", "value": "0000-0002" } }] },
                "journalInfo": { "journal": { "title": "Cancer Cell" } },
                "pubYear": "2021",
                "citedByCount": 7
            }]}
        });
        let records = parse_results(&body).unwrap();
        let r = &records[0];
        assert_eq!(r.title, "KRAS inhibitors in pancreatic cancer.");
        assert_eq!(r.abstract_text, "Background KRAS is mutated.");
        assert_eq!(r.authors[0].name, "Doe J");
        assert_eq!(r.authors[0].orcid.as_deref(), Some("0000-0002"));
        assert_eq!(r.journal.as_deref(), Some("Cancer Cell"));
        assert_eq!(r.year, Some(2021));
        assert_eq!(r.citation_count, 7);
        assert_eq!(r.url.as_deref(), Some("https://doi.org/10.1000/epmc"));
    }

    #[test]
    fn test_query_with_year_range() {
        assert_eq!(
            build_query("kras", Some(&YearRange::new(Some(2018), Some(2020)))),
            "(kras) AND PUB_YEAR:[2018 TO 2020]"
        );
        assert_eq!(
            build_query("kras", Some(&YearRange::new(Some(2018), None))),
            "(kras) AND PUB_YEAR:[2018 TO 3000]"
        );
        assert_eq!(build_query(" kras ", None), "kras");
    }

    #[test]
    fn test_missing_result_list_is_parse_error() {
        assert!(matches!(
            parse_results(&serde_json::json!({ "hitCount": 0 })),
            Err(SourceError::Parse(_))
        ));
    }
}
