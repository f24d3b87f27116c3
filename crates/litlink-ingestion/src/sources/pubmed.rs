//! PubMed E-utilities connector.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi

use async_trait::async_trait;
use litlink_config::SourceConfig;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use super::{SearchRequest, SourceConnector, SourceError, SourceKind, USER_AGENT};
use crate::http::PacedClient;
use crate::models::{Author, PublicationRecord, RecordDraft};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL:  &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

// NCBI requires both ends of a date range.
const OPEN_MIN_YEAR: i32 = 1800;
const OPEN_MAX_YEAR: i32 = 3000;

pub struct PubMedConnector {
    client: PacedClient,
    api_key: Option<String>,
}

impl PubMedConnector {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: PacedClient::new(SourceKind::PubMed.as_str(), config, USER_AGENT)?,
            api_key: config.api_key.clone(),
        })
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Search PubMed and return a list of PMIDs.
    #[instrument(skip(self, request), fields(query = %request.query))]
    async fn esearch(&self, request: &SearchRequest) -> Result<Vec<String>, SourceError> {
        let mut params = self.base_params();
        params.push(("term", request.query.trim().to_string()));
        params.push(("retmax", request.max_results.to_string()));
        params.push(("retmode", "json".to_string()));
        if let Some(range) = request.year_range {
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", range.from.unwrap_or(OPEN_MIN_YEAR).to_string()));
            params.push(("maxdate", range.to.unwrap_or(OPEN_MAX_YEAR).to_string()));
        }

        let resp: serde_json::Value = self.client.get_json(ESEARCH_URL, &params).await?;
        let ids = resp["esearchresult"]["idlist"]
            .as_array()
            .ok_or_else(|| SourceError::Parse("esearch response has no idlist".to_string()))?
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect::<Vec<_>>();

        debug!(n = ids.len(), "PubMed esearch returned PMIDs");
        Ok(ids)
    }

    #[instrument(skip(self, pmids), fields(n = pmids.len()))]
    async fn efetch(&self, pmids: &[String]) -> Result<Vec<PublicationRecord>, SourceError> {
        if pmids.is_empty() {
            return Ok(vec![]);
        }
        let mut params = self.base_params();
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let xml = self.client.get_text(EFETCH_URL, &params).await?;
        parse_pubmed_xml(&xml)
    }
}

#[async_trait]
impl SourceConnector for PubMedConnector {
    fn name(&self) -> &str {
        SourceKind::PubMed.as_str()
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        let pmids = self.esearch(request).await?;
        self.efetch(&pmids).await
    }
}

// ── XML parsing ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct ArticleState {
    pmid: Option<String>,
    doi: Option<String>,
    title: String,
    abstract_parts: Vec<String>,
    current_abstract: String,
    current_label: Option<String>,
    authors: Vec<Author>,
    last: String,
    fore: String,
    collective: String,
    journal: Option<String>,
    year: Option<i32>,
}

impl ArticleState {
    fn into_draft(self) -> RecordDraft {
        let abstract_text = self.abstract_parts.join(" ");
        RecordDraft {
            title: Some(self.title),
            abstract_text: Some(abstract_text),
            authors: self.authors,
            doi: self.doi,
            year: self.year,
            journal: self.journal,
            source: SourceKind::PubMed.as_str().to_string(),
            url: self.pmid.map(|p| format!("https://pubmed.ncbi.nlm.nih.gov/{p}/")),
            citation_count: None,
        }
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn is_doi_id(e: &BytesStart<'_>) -> bool {
    attr(e, "IdType").or_else(|| attr(e, "EIdType")).as_deref() == Some("doi")
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>...`) into records.
fn parse_pubmed_xml(xml: &str) -> Result<Vec<PublicationRecord>, SourceError> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<ArticleState> = None;
    let mut capture_doi = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "PubmedArticle" => current = Some(ArticleState::default()),
                    "ArticleId" | "ELocationID" => capture_doi = is_doi_id(e),
                    "AbstractText" => {
                        if let Some(a) = current.as_mut() {
                            a.current_abstract.clear();
                            a.current_label = attr(e, "Label");
                        }
                    }
                    "Author" => {
                        if let Some(a) = current.as_mut() {
                            a.last.clear();
                            a.fore.clear();
                            a.collective.clear();
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let Some(a) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let text = e
                    .unescape()
                    .map_err(|err| SourceError::Parse(format!("PubMed XML: {err}")))?;
                let top = stack.last().map(String::as_str).unwrap_or("");
                let parent = stack
                    .len()
                    .checked_sub(2)
                    .and_then(|i| stack.get(i))
                    .map(String::as_str)
                    .unwrap_or("");
                let inside = |tag: &str| stack.iter().any(|s| s == tag);

                if inside("ArticleTitle") {
                    a.title.push_str(&text);
                } else if inside("AbstractText") {
                    a.current_abstract.push_str(&text);
                } else {
                    match (top, parent) {
                        ("PMID", "MedlineCitation") if a.pmid.is_none() => {
                            a.pmid = Some(text.trim().to_string())
                        }
                        ("LastName", _) => a.last = text.trim().to_string(),
                        ("ForeName", _) => a.fore = text.trim().to_string(),
                        ("CollectiveName", _) => a.collective = text.trim().to_string(),
                        ("Title", "Journal") => a.journal = Some(text.trim().to_string()),
                        ("Year", "PubDate") => a.year = text.trim().parse().ok(),
                        ("MedlineDate", "PubDate") if a.year.is_none() => {
                            a.year = text.trim().get(..4).and_then(|y| y.parse().ok())
                        }
                        ("ArticleId" | "ELocationID", _) if capture_doi && a.doi.is_none() => {
                            a.doi = Some(text.trim().to_string())
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                stack.pop();
                match e.name().as_ref() {
                    b"ArticleId" | b"ELocationID" => capture_doi = false,
                    b"AbstractText" => {
                        if let Some(a) = current.as_mut() {
                            let body = collapse(&a.current_abstract);
                            if !body.is_empty() {
                                let part = match a.current_label.take() {
                                    Some(label) => format!("{label}: {body}"),
                                    None => body,
                                };
                                a.abstract_parts.push(part);
                            }
                        }
                    }
                    b"Author" => {
                        if let Some(a) = current.as_mut() {
                            let name = if !a.collective.is_empty() {
                                a.collective.clone()
                            } else if a.fore.is_empty() {
                                a.last.clone()
                            } else {
                                format!("{} {}", a.fore, a.last)
                            };
                            if !name.is_empty() {
                                a.authors.push(Author::new(name));
                            }
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(a) = current.take() {
                            if let Some(record) = PublicationRecord::ingest(a.into_draft()) {
                                records.push(record);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "PubMed XML parse error");
                return Err(SourceError::Parse(format!(
                    "PubMed XML at {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">12345678</PMID>
      <Article>
        <Journal>
          <JournalIssue><PubDate><Year>2022</Year><Month>Mar</Month></PubDate></JournalIssue>
          <Title>Nature</Title>
        </Journal>
        <ArticleTitle>KRAS G12D in <i>pancreatic</i> cancer</ArticleTitle>
        <ELocationID EIdType="doi" ValidYN="Y">10.1038/test.1</ELocationID>
        <Abstract>
          <AbstractText Label="BACKGROUND">KRAS is   mutated.</AbstractText>
          <AbstractText Label="RESULTS">Inhibition &amp; response.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>John</ForeName></Author>
          <Author><CollectiveName>KRAS Consortium</CollectiveName></Author>
        </AuthorList>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections><PMID>999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>22222222</PMID>
      <Article>
        <Journal><JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue></Journal>
        <ArticleTitle>Second article</ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_pubmed_xml() {
        let records = parse_pubmed_xml(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);

        let r = &records[0];
        assert_eq!(r.title, "KRAS G12D in pancreatic cancer");
        assert_eq!(r.doi.as_deref(), Some("10.1038/test.1"));
        assert_eq!(r.year, Some(2022));
        assert_eq!(r.journal.as_deref(), Some("Nature"));
        assert_eq!(r.abstract_text, "BACKGROUND: KRAS is mutated. RESULTS: Inhibition & response.");
        assert_eq!(r.authors[0].name, "John Smith");
        assert_eq!(r.authors[1].name, "KRAS Consortium");
        assert_eq!(r.url.as_deref(), Some("https://pubmed.ncbi.nlm.nih.gov/12345678/"));
        assert_eq!(r.source, "pubmed");
    }

    #[test]
    fn test_missing_abstract_gets_placeholder() {
        let records = parse_pubmed_xml(SAMPLE).unwrap();
        let r = &records[1];
        assert_eq!(r.year, Some(1998));
        assert!(r.has_placeholder_abstract());
        assert_eq!(r.abstract_text, "Abstract not available. Title: Second article");
    }

    #[test]
    fn test_empty_set() {
        assert!(parse_pubmed_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml_is_parse_error() {
        let err = parse_pubmed_xml("<PubmedArticleSet><PubmedArticle></Wrong>").unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
