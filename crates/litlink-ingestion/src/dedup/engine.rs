//! Record linkage: one linear pass over the input with an index of the
//! records accepted so far.
//!
//! Matching stages, cheapest first:
//!   1. exact DOI (case-insensitive, resolver prefixes ignored)
//!   2. SHA-256 of the normalised title
//!   3. Ratcliff/Obershelp ratio of normalised titles against every unique
//!      record, optionally gated on author overlap
//!
//! The first record seen is always kept as the original.

use std::collections::HashMap;

use litlink_config::LinkageConfig;
use tracing::{debug, info, warn};

use super::normalise::{author_overlap, normalize_title, title_hash};
use super::report::{DuplicateEntry, DuplicateReason, DuplicateReport, DuplicateReportBuilder, RecordRef};
use super::similarity::{length_upper_bound, ratcliff_obershelp};
use crate::models::PublicationRecord;

/// Outcome of checking one record against the accepted set.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Unique,
    Duplicate {
        reason: DuplicateReason,
        original: RecordRef,
        score: f64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct LinkageOutcome {
    /// Unique records in their original relative order.
    pub unique: Vec<PublicationRecord>,
    pub report: DuplicateReport,
}

/// Per-record keys, computed once.
struct Keys {
    doi: Option<String>,
    title: String,
    title_len: usize,
    hash: String,
}

impl Keys {
    fn of(record: &PublicationRecord) -> Self {
        let title = normalize_title(&record.title);
        Self {
            doi: record.normalized_doi(),
            title_len: title.chars().count(),
            hash: title_hash(&title),
            title,
        }
    }
}

/// Accepted-so-far set with its DOI and title-hash lookups.
pub struct LinkageIndex<'c> {
    config: &'c LinkageConfig,
    unique: Vec<PublicationRecord>,
    titles: Vec<(String, usize)>,
    by_doi: HashMap<String, usize>,
    by_title_hash: HashMap<String, usize>,
}

impl<'c> LinkageIndex<'c> {
    pub fn new(config: &'c LinkageConfig) -> Self {
        Self {
            config,
            unique: Vec::new(),
            titles: Vec::new(),
            by_doi: HashMap::new(),
            by_title_hash: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.unique.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }

    /// Classify `record` against the accepted set without modifying it.
    pub fn classify(&self, record: &PublicationRecord) -> Classification {
        self.classify_keys(record, &Keys::of(record))
    }

    fn classify_keys(&self, record: &PublicationRecord, keys: &Keys) -> Classification {
        if self.config.use_doi {
            if let Some(&idx) = keys.doi.as_ref().and_then(|d| self.by_doi.get(d)) {
                return self.duplicate_of(idx, DuplicateReason::ExactDoi, 1.0);
            }
        }

        if self.config.use_title_hash {
            if let Some(&idx) = self.by_title_hash.get(&keys.hash) {
                return self.duplicate_of(idx, DuplicateReason::NormalizedTitleHash, 1.0);
            }
        }

        if self.config.use_fuzzy {
            if let Some((idx, score, reason)) = self.best_fuzzy_match(record, keys) {
                return self.duplicate_of(idx, reason, score);
            }
        }

        Classification::Unique
    }

    /// Highest-scoring unique record at or above the threshold that also
    /// passes the author gate when it is enabled. Earliest wins on ties.
    fn best_fuzzy_match(
        &self,
        record: &PublicationRecord,
        keys: &Keys,
    ) -> Option<(usize, f64, DuplicateReason)> {
        let threshold = self.config.similarity_threshold;
        let mut best: Option<(usize, f64)> = None;

        for (idx, (title, len)) in self.titles.iter().enumerate() {
            let ceiling = length_upper_bound(keys.title_len, *len);
            if ceiling < threshold || best.is_some_and(|(_, s)| ceiling <= s) {
                continue;
            }

            let score = ratcliff_obershelp(&keys.title, title);
            if !meets_threshold(score, threshold) {
                continue;
            }
            if self.config.use_author_overlap
                && author_overlap(&record.authors, &self.unique[idx].authors)
                    < self.config.author_overlap_min
            {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        let reason = if self.config.use_author_overlap {
            DuplicateReason::FuzzyTitleAuthorOverlap
        } else {
            DuplicateReason::FuzzyTitle
        };
        best.map(|(idx, score)| (idx, score, reason))
    }

    fn duplicate_of(&self, idx: usize, reason: DuplicateReason, score: f64) -> Classification {
        Classification::Duplicate {
            reason,
            original: RecordRef::from(&self.unique[idx]),
            score,
        }
    }

    fn accept(&mut self, record: PublicationRecord, keys: Keys) {
        let idx = self.unique.len();
        if let Some(doi) = keys.doi {
            self.by_doi.entry(doi).or_insert(idx);
        }
        self.by_title_hash.entry(keys.hash).or_insert(idx);
        self.titles.push((keys.title, keys.title_len));
        self.unique.push(record);
    }

    fn into_unique(self) -> Vec<PublicationRecord> {
        self.unique
    }
}

/// `score >= threshold`, the comparison every fuzzy decision goes through.
pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    score >= threshold
}

/// Record linkage engine. Cheap to construct; holds only configuration.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: LinkageConfig,
}

impl Deduplicator {
    pub fn new(config: LinkageConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkageConfig {
        &self.config
    }

    /// Single pass over `records` in input order.
    pub fn deduplicate(&self, records: Vec<PublicationRecord>) -> LinkageOutcome {
        let input = records.len();
        let mut index = LinkageIndex::new(&self.config);
        let mut report = DuplicateReportBuilder::new();

        self.run_pass(&mut index, &mut report, records);

        let unique = index.into_unique();
        let report = report.build();
        info!(
            input,
            unique = unique.len(),
            duplicates = report.total_duplicates(),
            skipped = report.counts().skipped,
            "Record linkage complete"
        );
        LinkageOutcome { unique, report }
    }

    /// Cross-source variant: each bucket is deduplicated on its own, then the
    /// union of the per-bucket survivors goes through a final pass.
    pub fn deduplicate_by_source(&self, buckets: Vec<Vec<PublicationRecord>>) -> LinkageOutcome {
        let mut report = DuplicateReportBuilder::new();
        let mut survivors = Vec::new();

        for bucket in buckets {
            let mut index = LinkageIndex::new(&self.config);
            self.run_pass(&mut index, &mut report, bucket);
            survivors.extend(index.into_unique());
        }
        debug!(survivors = survivors.len(), within_source = report.len(), "Per-source pass done");

        let mut index = LinkageIndex::new(&self.config);
        self.run_pass(&mut index, &mut report, survivors);

        let unique = index.into_unique();
        let report = report.build();
        info!(
            unique = unique.len(),
            duplicates = report.total_duplicates(),
            "Cross-source record linkage complete"
        );
        LinkageOutcome { unique, report }
    }

    fn run_pass(
        &self,
        index: &mut LinkageIndex<'_>,
        report: &mut DuplicateReportBuilder,
        records: Vec<PublicationRecord>,
    ) {
        for record in records {
            let keys = Keys::of(&record);
            if keys.title.is_empty() {
                warn!(record_id = %record.record_id, source = %record.source, "Skipping record with blank normalised title");
                report.skip(RecordRef::from(&record));
                continue;
            }

            match index.classify_keys(&record, &keys) {
                Classification::Unique => index.accept(record, keys),
                Classification::Duplicate { reason, original, score } => {
                    debug!(
                        duplicate = %record.record_id,
                        original = %original.record_id,
                        reason = reason.as_str(),
                        score,
                        "Duplicate found"
                    );
                    report.push(DuplicateEntry {
                        original,
                        duplicate: RecordRef::from(&record),
                        reason,
                        similarity: score,
                    });
                }
            }
        }
    }
}
