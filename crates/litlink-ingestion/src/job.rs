//! Acquisition job: the state of one multi-source request.
//!
//! ```text
//! Pending ──start──▶ Running ──complete──▶ Completed
//!                       │
//!                       └────fail────▶ Failed
//! ```
//!
//! Only the orchestrator mutates a job. Everyone else reads a
//! [`JobSnapshot`], which is a detached copy.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use litlink_common::{LitlinkError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dedup::{DuplicateReport, LinkageOutcome};
use crate::models::{PublicationRecord, YearRange};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending   => "pending",
            JobStatus::Running   => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed    => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records returned by one source, kept in request order.
#[derive(Debug, Clone, Default)]
pub struct SourceBucket {
    pub source: String,
    pub records: Vec<PublicationRecord>,
    pub attempted: bool,
}

#[derive(Debug, Clone)]
pub struct AcquisitionJob {
    pub id: JobId,
    pub query: String,
    /// Source ids as requested, including unknown ones.
    pub sources: Vec<String>,
    pub max_results: usize,
    pub year_range: Option<YearRange>,
    pub formats: Vec<String>,

    status: JobStatus,
    progress: f64,
    current_source: Option<String>,
    buckets: Vec<SourceBucket>,
    unique: Vec<PublicationRecord>,
    report: Option<DuplicateReport>,
    errors: Vec<String>,
    exported_files: Vec<PathBuf>,

    total_downloaded: usize,
    total_unique: usize,
    total_duplicates: usize,

    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl AcquisitionJob {
    pub fn new(
        query: impl Into<String>,
        sources: Vec<String>,
        max_results: usize,
        year_range: Option<YearRange>,
        formats: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            sources,
            max_results,
            year_range,
            formats,
            status: JobStatus::Pending,
            progress: 0.0,
            current_source: None,
            buckets: Vec::new(),
            unique: Vec::new(),
            report: None,
            errors: Vec::new(),
            exported_files: Vec::new(),
            total_downloaded: 0,
            total_unique: 0,
            total_duplicates: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn buckets(&self) -> &[SourceBucket] {
        &self.buckets
    }

    pub fn unique(&self) -> &[PublicationRecord] {
        &self.unique
    }

    pub fn report(&self) -> Option<&DuplicateReport> {
        self.report.as_ref()
    }

    pub fn total_downloaded(&self) -> usize {
        self.total_downloaded
    }

    /// Every downloaded record, bucket by bucket in request order.
    pub fn flattened_records(&self) -> Vec<PublicationRecord> {
        self.buckets.iter().flat_map(|b| b.records.iter().cloned()).collect()
    }

    pub fn bucket_records(&self) -> Vec<Vec<PublicationRecord>> {
        self.buckets.iter().map(|b| b.records.clone()).collect()
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// Pending → Running. Opens one empty bucket per valid source.
    pub fn start(&mut self, valid_sources: &[String]) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(LitlinkError::Validation(format!(
                "job {} cannot start from state {}",
                self.id, self.status
            )));
        }
        self.buckets = valid_sources
            .iter()
            .map(|s| SourceBucket { source: s.clone(), ..Default::default() })
            .collect();
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        info!(job_id = %self.id, sources = ?valid_sources, "Job running");
        Ok(())
    }

    pub fn set_current_source(&mut self, source: Option<&str>) {
        self.current_source = source.map(String::from);
    }

    /// Store one source's records in its bucket.
    pub fn record_source_result(&mut self, source: &str, records: Vec<PublicationRecord>) {
        self.total_downloaded += records.len();
        match self.buckets.iter_mut().find(|b| b.source == source) {
            Some(bucket) => {
                bucket.attempted = true;
                bucket.records.extend(records);
            }
            None => self.buckets.push(SourceBucket {
                source: source.to_string(),
                records,
                attempted: true,
            }),
        }
    }

    pub fn mark_attempted(&mut self, source: &str) {
        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.source == source) {
            bucket.attempted = true;
        }
    }

    /// Non-fatal error; the job keeps running.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.id, error = %message, "Job error recorded");
        self.errors.push(message);
    }

    /// Values below the current progress are ignored; input is clamped to [0, 1].
    pub fn set_progress(&mut self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        if value > self.progress {
            self.progress = value;
        }
    }

    /// Store the linkage result. Skipped records become job errors.
    pub fn apply_linkage(&mut self, outcome: LinkageOutcome) {
        for skipped in outcome.report.skipped() {
            self.record_error(format!(
                "record {} from {} skipped: title normalises to nothing",
                skipped.record_id, skipped.source
            ));
        }
        self.total_unique = outcome.unique.len();
        self.total_duplicates = outcome.report.total_duplicates();
        self.unique = outcome.unique;
        self.report = Some(outcome.report);
    }

    pub fn add_exported_file(&mut self, path: PathBuf) {
        self.exported_files.push(path);
    }

    /// Running → Completed, progress 1.0.
    pub fn complete(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.set_progress(1.0);
        self.current_source = None;
        self.completed_at = Some(Utc::now());
        info!(
            job_id = %self.id,
            downloaded = self.total_downloaded,
            unique = self.total_unique,
            duplicates = self.total_duplicates,
            errors = self.errors.len(),
            "Job completed"
        );
    }

    /// Any non-terminal state → Failed, with the cause recorded.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let message = message.into();
        self.status = JobStatus::Failed;
        self.current_source = None;
        self.completed_at = Some(Utc::now());
        warn!(job_id = %self.id, error = %message, "Job failed");
        self.errors.push(message);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.to_string(),
            query: self.query.clone(),
            sources: self.sources.clone(),
            status: self.status,
            progress: self.progress,
            current_source: self.current_source.clone(),
            total_downloaded: self.total_downloaded,
            total_unique: self.total_unique,
            total_duplicates: self.total_duplicates,
            total_skipped: self.report.as_ref().map_or(0, |r| r.counts().skipped),
            per_source: self
                .buckets
                .iter()
                .map(|b| (b.source.clone(), b.records.len()))
                .collect(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            errors: self.errors.clone(),
            exported_files: self
                .exported_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        }
    }
}

/// Read-only view of a job, safe to hand to any reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub query: String,
    pub sources: Vec<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub current_source: Option<String>,
    pub total_downloaded: usize,
    pub total_unique: usize,
    pub total_duplicates: usize,
    #[serde(default)]
    pub total_skipped: usize,
    #[serde(default)]
    pub per_source: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub exported_files: Vec<String>,
}
