//! Duplicate report: the audit trail of one linkage run.
//!
//! Entries are appended through [`DuplicateReportBuilder`] while the engine
//! runs; [`DuplicateReportBuilder::build`] freezes them into an immutable
//! [`DuplicateReport`] with the aggregate counters computed once.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PublicationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    ExactDoi,
    NormalizedTitleHash,
    FuzzyTitle,
    FuzzyTitleAuthorOverlap,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::ExactDoi                => "exact_doi",
            DuplicateReason::NormalizedTitleHash     => "normalized_title_hash",
            DuplicateReason::FuzzyTitle              => "fuzzy_title",
            DuplicateReason::FuzzyTitleAuthorOverlap => "fuzzy_title_author_overlap",
        }
    }

    pub fn is_title_similarity(&self) -> bool {
        matches!(self, DuplicateReason::FuzzyTitle | DuplicateReason::FuzzyTitleAuthorOverlap)
    }
}

/// Lightweight pointer to a record, kept in the report instead of a clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_id: Uuid,
    pub title: String,
    pub source: String,
    pub doi: Option<String>,
}

impl From<&PublicationRecord> for RecordRef {
    fn from(r: &PublicationRecord) -> Self {
        Self {
            record_id: r.record_id,
            title: r.title.clone(),
            source: r.source.clone(),
            doi: r.doi.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub original: RecordRef,
    pub duplicate: RecordRef,
    pub reason: DuplicateReason,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub total_duplicates: usize,
    pub by_doi: usize,
    pub by_title_hash: usize,
    /// Fuzzy matches, with or without the author gate.
    pub by_title_similarity: usize,
    /// Subset of `by_title_similarity` confirmed by author overlap.
    pub by_author_overlap: usize,
    /// Malformed records left out of the run.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    entries: Vec<DuplicateEntry>,
    skipped: Vec<RecordRef>,
    counts: ReportCounts,
}

impl DuplicateReport {
    pub fn entries(&self) -> &[DuplicateEntry] {
        &self.entries
    }

    pub fn counts(&self) -> &ReportCounts {
        &self.counts
    }

    /// Records left out of the run, in input order.
    pub fn skipped(&self) -> &[RecordRef] {
        &self.skipped
    }

    pub fn total_duplicates(&self) -> usize {
        self.counts.total_duplicates
    }

    pub fn count_for(&self, reason: DuplicateReason) -> usize {
        self.entries.iter().filter(|e| e.reason == reason).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.skipped.is_empty()
    }

    /// Shape written to `{job_id}_{timestamp}_duplicates.json`.
    pub fn to_export(&self) -> DuplicateReportFile {
        DuplicateReportFile {
            summary: ReportSummary {
                total_duplicates_found: self.counts.total_duplicates,
                duplicates_by_doi: self.counts.by_doi,
                duplicates_by_title_similarity: self.counts.by_title_similarity,
                duplicates_by_hash: self.counts.by_title_hash,
            },
            duplicates: self
                .entries
                .iter()
                .map(|e| ExportedDuplicate {
                    original_title: e.original.title.clone(),
                    duplicate_title: e.duplicate.title.clone(),
                    reason: e.reason.as_str().to_string(),
                    similarity_score: e.similarity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DuplicateReportBuilder {
    entries: Vec<DuplicateEntry>,
    skipped: Vec<RecordRef>,
}

impl DuplicateReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DuplicateEntry) {
        self.entries.push(entry);
    }

    pub fn skip(&mut self, record: RecordRef) {
        self.skipped.push(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> DuplicateReport {
        let mut counts = ReportCounts {
            skipped: self.skipped.len(),
            total_duplicates: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.reason {
                DuplicateReason::ExactDoi => counts.by_doi += 1,
                DuplicateReason::NormalizedTitleHash => counts.by_title_hash += 1,
                DuplicateReason::FuzzyTitle => counts.by_title_similarity += 1,
                DuplicateReason::FuzzyTitleAuthorOverlap => {
                    counts.by_title_similarity += 1;
                    counts.by_author_overlap += 1;
                }
            }
        }
        DuplicateReport { entries: self.entries, skipped: self.skipped, counts }
    }
}

// ── Export schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReportFile {
    pub summary: ReportSummary,
    pub duplicates: Vec<ExportedDuplicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_duplicates_found: usize,
    pub duplicates_by_doi: usize,
    pub duplicates_by_title_similarity: usize,
    pub duplicates_by_hash: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedDuplicate {
    pub original_title: String,
    pub duplicate_title: String,
    pub reason: String,
    pub similarity_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rref(title: &str) -> RecordRef {
        RecordRef {
            record_id: Uuid::new_v4(),
            title: title.to_string(),
            source: "crossref".to_string(),
            doi: None,
        }
    }

    fn entry(reason: DuplicateReason, similarity: f64) -> DuplicateEntry {
        DuplicateEntry { original: rref("A"), duplicate: rref("B"), reason, similarity }
    }

    #[test]
    fn test_counts_by_reason() {
        let mut builder = DuplicateReportBuilder::new();
        builder.push(entry(DuplicateReason::ExactDoi, 1.0));
        builder.push(entry(DuplicateReason::NormalizedTitleHash, 1.0));
        builder.push(entry(DuplicateReason::FuzzyTitle, 0.97));
        builder.push(entry(DuplicateReason::FuzzyTitleAuthorOverlap, 0.96));
        builder.skip(rref("???"));
        let report = builder.build();

        let c = report.counts();
        assert_eq!(c.total_duplicates, 4);
        assert_eq!(c.by_doi, 1);
        assert_eq!(c.by_title_hash, 1);
        assert_eq!(c.by_title_similarity, 2);
        assert_eq!(c.by_author_overlap, 1);
        assert_eq!(c.skipped, 1);
        assert_eq!(report.count_for(DuplicateReason::FuzzyTitle), 1);
        assert_eq!(report.skipped()[0].title, "???");
    }

    #[test]
    fn test_export_schema_field_names() {
        let mut builder = DuplicateReportBuilder::new();
        builder.push(entry(DuplicateReason::ExactDoi, 1.0));
        let json = serde_json::to_value(builder.build().to_export()).unwrap();

        assert_eq!(json["summary"]["total_duplicates_found"], 1);
        assert_eq!(json["summary"]["duplicates_by_doi"], 1);
        assert_eq!(json["summary"]["duplicates_by_title_similarity"], 0);
        assert_eq!(json["summary"]["duplicates_by_hash"], 0);
        assert_eq!(json["duplicates"][0]["original_title"], "A");
        assert_eq!(json["duplicates"][0]["duplicate_title"], "B");
        assert_eq!(json["duplicates"][0]["reason"], "exact_doi");
        assert_eq!(json["duplicates"][0]["similarity_score"], 1.0);
    }
}
