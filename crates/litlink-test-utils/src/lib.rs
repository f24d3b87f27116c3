//! Scripted connectors and record builders for litlink tests.
//!
//! None of these touch the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use litlink_ingestion::{
    Author, JobSnapshot, PublicationRecord, RecordDraft, SearchRequest, SourceConnector, SourceError,
};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

// ── Records ──────────────────────────────────────────────────────────────────

pub fn record(title: &str, doi: Option<&str>, source: &str) -> PublicationRecord {
    PublicationRecord::ingest(RecordDraft {
        title: Some(title.to_string()),
        doi: doi.map(str::to_string),
        source: source.to_string(),
        ..Default::default()
    })
    .unwrap_or_else(|| panic!("test record needs a title, got {title:?}"))
}

pub fn record_with_authors(title: &str, authors: &[&str], source: &str) -> PublicationRecord {
    let mut r = record(title, None, source);
    r.authors = authors.iter().map(|a| Author::new(*a)).collect();
    r
}

/// `n` records with distinct titles.
pub fn distinct_records(n: usize, source: &str) -> Vec<PublicationRecord> {
    const TOPICS: [&str; 8] = [
        "Protein folding kinetics",
        "Graph partitioning heuristics",
        "Ocean salinity trends",
        "Compiler register allocation",
        "Bird migration routes",
        "Battery cathode chemistry",
        "Medieval trade networks",
        "Quantum error correction",
    ];
    (0..n)
        .map(|i| record(&format!("{} volume {i}", TOPICS[i % TOPICS.len()]), None, source))
        .collect()
}

/// `total_unique + total_duplicates + total_skipped == total_downloaded`.
pub fn assert_totals_balance(snapshot: &JobSnapshot) {
    assert_eq!(
        snapshot.total_unique + snapshot.total_duplicates + snapshot.total_skipped,
        snapshot.total_downloaded,
        "totals do not balance for job {}",
        snapshot.job_id
    );
}

// ── Connectors ───────────────────────────────────────────────────────────────

/// Returns the same records on every call and counts calls.
pub struct StaticConnector {
    name: String,
    records: Vec<PublicationRecord>,
    calls: AtomicUsize,
}

impl StaticConnector {
    pub fn new(name: &str, records: Vec<PublicationRecord>) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), records, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for StaticConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .iter()
            .filter(|r| request.accepts_year(r.year))
            .take(request.max_results)
            .cloned()
            .collect())
    }
}

/// Always fails with an API error.
pub struct FailingConnector {
    name: String,
    message: String,
}

impl FailingConnector {
    pub fn new(name: &str, message: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), message: message.to_string() })
    }
}

#[async_trait]
impl SourceConnector for FailingConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        Err(SourceError::Api {
            url: format!("mock://{}", self.name),
            message: self.message.clone(),
        })
    }
}

/// Panics inside `search`.
pub struct PanickingConnector {
    name: String,
}

impl PanickingConnector {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string() })
    }
}

#[async_trait]
impl SourceConnector for PanickingConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        panic!("{} exploded mid-request", self.name);
    }
}

/// Sleeps before answering; tracks how many calls overlap.
pub struct DelayedConnector {
    name: String,
    delay: Duration,
    records: Vec<PublicationRecord>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl DelayedConnector {
    /// Connectors built with the same `in_flight`/`peak` counters report
    /// their combined concurrency.
    pub fn new(
        name: &str,
        delay: Duration,
        records: Vec<PublicationRecord>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), delay, records, in_flight, peak })
    }
}

#[async_trait]
impl SourceConnector for DelayedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// Signals `started` when called, then waits for `release` before answering.
pub struct GatedConnector {
    name: String,
    records: Vec<PublicationRecord>,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedConnector {
    pub fn new(name: &str, records: Vec<PublicationRecord>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            records,
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl SourceConnector for GatedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<PublicationRecord>, SourceError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.records.clone())
    }
}

/// Poll `status` until the job reaches a terminal state or `timeout` passes.
pub async fn wait_for_terminal<F, Fut>(mut status: F, timeout: Duration) -> JobSnapshot
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = JobSnapshot>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = status().await;
        if snapshot.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
