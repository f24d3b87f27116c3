//! Data models shared by connectors, linkage and export.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::dedup::normalise::{normalize_doi, normalize_title};

/// One bibliographic record as produced by a source connector.
///
/// Built only through [`PublicationRecord::ingest`], so `title` and
/// `abstract_text` are never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub record_id: Uuid,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<Author>,
    pub doi: Option<String>,
    pub year: Option<i32>,
    pub journal: Option<String>,
    /// Connector that produced the record, e.g. "crossref".
    pub source: String,
    pub url: Option<String>,
    pub citation_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub affiliation: Option<String>,
    pub orcid: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), affiliation: None, orcid: None }
    }
}

/// Raw, unchecked fields collected by a connector before ingestion.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Vec<Author>,
    pub doi: Option<String>,
    pub year: Option<i32>,
    pub journal: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub citation_count: Option<u64>,
}

impl PublicationRecord {
    /// Validate a draft and fill in the abstract placeholder.
    /// Returns `None` for drafts without a usable title, including titles
    /// that normalise to nothing (e.g. only punctuation) and so could never
    /// be linked.
    pub fn ingest(draft: RecordDraft) -> Option<Self> {
        let title = collapse_whitespace(draft.title.as_deref().unwrap_or(""));
        if title.is_empty() {
            warn!(source = %draft.source, doi = ?draft.doi, "Dropping record without title");
            return None;
        }
        if normalize_title(&title).is_empty() {
            warn!(source = %draft.source, title = %title, "Dropping record with unlinkable title");
            return None;
        }

        let journal = draft
            .journal
            .map(|j| collapse_whitespace(&j))
            .filter(|j| !j.is_empty());

        let abstract_text = draft
            .abstract_text
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| abstract_placeholder(&title, journal.as_deref()));

        let authors = draft
            .authors
            .into_iter()
            .filter(|a| !a.name.trim().is_empty())
            .map(|a| Author { name: collapse_whitespace(&a.name), ..a })
            .collect();

        Some(Self {
            record_id: Uuid::new_v4(),
            title,
            abstract_text,
            authors,
            doi: draft.doi.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            year: draft.year,
            journal,
            source: draft.source,
            url: draft.url.filter(|u| !u.trim().is_empty()),
            citation_count: draft.citation_count.unwrap_or(0),
        })
    }

    pub fn normalized_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(normalize_doi)
    }

    /// True when the abstract is the generated placeholder rather than real text.
    pub fn has_placeholder_abstract(&self) -> bool {
        self.abstract_text == abstract_placeholder(&self.title, self.journal.as_deref())
    }
}

/// Inclusive publication-year filter passed to connectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub from: Option<i32>,
    pub to: Option<i32>,
}

impl YearRange {
    pub fn new(from: Option<i32>, to: Option<i32>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.from.map_or(true, |f| year >= f) && self.to.map_or(true, |t| year <= t)
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }
}

pub fn abstract_placeholder(title: &str, journal: Option<&str>) -> String {
    match journal {
        Some(j) => format!("Abstract not available. Title: {title}. Journal: {j}"),
        None => format!("Abstract not available. Title: {title}"),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str) -> RecordDraft {
        RecordDraft {
            title: Some(title.to_string()),
            source: "crossref".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ingest_rejects_blank_title() {
        assert!(PublicationRecord::ingest(draft("   ")).is_none());
        assert!(PublicationRecord::ingest(RecordDraft::default()).is_none());
    }

    #[test]
    fn test_ingest_rejects_punctuation_only_title() {
        assert!(PublicationRecord::ingest(draft("???")).is_none());
        assert!(PublicationRecord::ingest(draft(" -- ; ")).is_none());
        assert!(PublicationRecord::ingest(draft("? A")).is_some());
    }

    #[test]
    fn test_ingest_fills_placeholder_abstract() {
        let mut d = draft("Deep  Learning\n for Proteins");
        d.journal = Some("Nature".to_string());
        let r = PublicationRecord::ingest(d).unwrap();
        assert_eq!(r.title, "Deep Learning for Proteins");
        assert_eq!(
            r.abstract_text,
            "Abstract not available. Title: Deep Learning for Proteins. Journal: Nature"
        );
        assert!(r.has_placeholder_abstract());
        assert_eq!(r.citation_count, 0);
    }

    #[test]
    fn test_ingest_keeps_real_abstract() {
        let mut d = draft("A title");
        d.abstract_text = Some("  Real text. ".to_string());
        let r = PublicationRecord::ingest(d).unwrap();
        assert_eq!(r.abstract_text, "Real text.");
        assert!(!r.has_placeholder_abstract());
    }

    #[test]
    fn test_year_range_contains_is_inclusive() {
        let range = YearRange::new(Some(2018), Some(2020));
        assert!(range.contains(2018));
        assert!(range.contains(2020));
        assert!(!range.contains(2021));
        assert!(YearRange::default().contains(1900));
        assert!(YearRange::default().is_unbounded());
    }
}
