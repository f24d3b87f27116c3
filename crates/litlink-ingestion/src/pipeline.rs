//! Unified downloader: runs acquisition jobs end to end.
//!
//! For one job:
//!   1. Validate the requested sources against the connector registry
//!   2. Query each source, sequentially or with bounded parallelism
//!   3. Run record linkage over everything that came back
//!   4. Export the unified set and the duplicate report
//!   5. Emit progress events via broadcast channel
//!
//! A source that errors or panics, or a failing export format, is recorded
//! on the job and the run continues. Only a failure before linkage finishes
//! marks the job failed.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use litlink_common::{LitlinkError, Result};
use litlink_config::LitlinkConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::dedup::{Deduplicator, LinkageOutcome};
use crate::export;
use crate::job::{AcquisitionJob, JobId, JobSnapshot};
use crate::models::{PublicationRecord, YearRange};
use crate::registry::{JobHandle, JobRegistry};
use crate::sources::{ConnectorRegistry, SearchRequest, SourceConnector, SourceError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Job request ───────────────────────────────────────────────────────────────

/// Parameters for a single acquisition run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub query: String,
    pub sources: Vec<String>,
    /// Per-source cap; falls back to `orchestrator.default_max_results`.
    pub max_results: Option<usize>,
    pub year_range: Option<YearRange>,
    /// Export formats; falls back to `output.formats`.
    pub formats: Option<Vec<String>>,
}

impl JobRequest {
    pub fn new(query: impl Into<String>, sources: &[&str]) -> Self {
        Self {
            query: query.into(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn with_years(mut self, range: YearRange) -> Self {
        self.year_range = Some(range);
        self
    }

    pub fn with_formats(mut self, formats: &[&str]) -> Self {
        self.formats = Some(formats.iter().map(|s| s.to_string()).collect());
        self
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Started,
    SourceCompleted,
    SourceFailed,
    Cancelled,
    Linkage,
    Export,
    Completed,
    Failed,
}

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub stage: JobStage,
    pub source: Option<String>,
    pub message: String,
    pub progress: f64,
}

enum SourceOutcome {
    Fetched(Vec<PublicationRecord>),
    Failed(SourceError),
    Panicked(String),
    NotAttempted,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// Cheap to clone; clones share connectors, job registry and event channel.
#[derive(Clone)]
pub struct UnifiedDownloader {
    connectors: Arc<ConnectorRegistry>,
    jobs: Arc<JobRegistry>,
    config: Arc<LitlinkConfig>,
    events: broadcast::Sender<JobEvent>,
}

impl UnifiedDownloader {
    pub fn new(config: LitlinkConfig, connectors: ConnectorRegistry, jobs: Arc<JobRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connectors: Arc::new(connectors),
            jobs,
            config: Arc::new(config),
            events,
        }
    }

    /// Built-in connectors and a fresh job registry.
    pub fn from_config(config: LitlinkConfig) -> Self {
        let connectors = ConnectorRegistry::with_defaults(&config.sources);
        Self::new(config, connectors, Arc::new(JobRegistry::new()))
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn config(&self) -> &LitlinkConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Validate and start a job in the background; returns its id at once.
    pub async fn start_job(&self, request: JobRequest) -> Result<JobId> {
        let (handle, connectors) = self.prepare(request).await?;
        let id = handle.id();
        tokio::spawn(self.clone().supervise(handle, connectors));
        Ok(id)
    }

    /// Validate and run a job to completion on the current task.
    pub async fn run_job(&self, request: JobRequest) -> Result<JobSnapshot> {
        let (handle, connectors) = self.prepare(request).await?;
        self.clone().supervise(handle.clone(), connectors).await;
        Ok(handle.snapshot().await)
    }

    pub async fn get_job_status(&self, id: &JobId) -> Result<JobSnapshot> {
        self.jobs.snapshot(id).await.ok_or(LitlinkError::JobNotFound(*id))
    }

    /// Stop scheduling further sources for `id`. Calls already in flight finish.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        if self.jobs.cancel(id).await {
            Ok(())
        } else {
            Err(LitlinkError::JobNotFound(*id))
        }
    }

    fn emit(&self, job_id: JobId, stage: JobStage, source: Option<&str>, message: String, progress: f64) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent {
            job_id,
            stage,
            source: source.map(String::from),
            message,
            progress,
        });
    }

    /// Register the job, resolve its sources and move it to Running.
    /// Validation failures leave a Failed job in the registry.
    async fn prepare(
        &self,
        request: JobRequest,
    ) -> Result<(Arc<JobHandle>, Vec<Arc<dyn SourceConnector>>)> {
        let max_results = request
            .max_results
            .unwrap_or(self.config.orchestrator.default_max_results);
        let formats = request
            .formats
            .clone()
            .unwrap_or_else(|| self.config.output.formats.clone());
        let query = request.query.trim().to_string();

        let job = AcquisitionJob::new(
            query.clone(),
            request.sources.clone(),
            max_results,
            request.year_range,
            formats,
        );
        let handle = self.jobs.insert(job).await;
        let job_id = handle.id();

        let resolved = self.connectors.resolve(&request.sources);
        handle
            .update(|job| {
                for id in &resolved.unknown {
                    job.record_error(format!("unknown source '{id}' ignored"));
                }
            })
            .await;

        let invalid = if query.is_empty() {
            Some("query must not be empty".to_string())
        } else if max_results == 0 {
            Some("max_results must be at least 1".to_string())
        } else if resolved.known.is_empty() {
            Some("no valid sources".to_string())
        } else {
            None
        };
        if let Some(message) = invalid {
            handle.update(|job| job.fail(message.clone())).await;
            self.emit(job_id, JobStage::Failed, None, message.clone(), 0.0);
            return Err(LitlinkError::Validation(message));
        }

        let names: Vec<String> = resolved.known.iter().map(|c| c.name().to_string()).collect();
        handle.update(|job| job.start(&names)).await?;
        self.emit(
            job_id,
            JobStage::Started,
            None,
            format!("Searching {} source(s) for '{query}'", names.len()),
            0.0,
        );
        info!(job_id = %job_id, query = %query, sources = ?names, "Acquisition job started");

        Ok((handle, resolved.known))
    }

    /// Run the job on its own task. A panic escaping it fails the job
    /// rather than leaving it Running.
    async fn supervise(self, handle: Arc<JobHandle>, connectors: Vec<Arc<dyn SourceConnector>>) {
        let run = tokio::spawn({
            let this = self.clone();
            let handle = handle.clone();
            async move { this.execute(handle, connectors).await }
        });
        if let Err(e) = run.await {
            let message = format!("job aborted: {e}");
            warn!(job_id = %handle.id(), error = %e, "Job task aborted");
            handle.update(|job| job.fail(message.clone())).await;
            self.emit(handle.id(), JobStage::Failed, None, message, 0.0);
        }
    }

    #[instrument(skip(self, handle, connectors), fields(job_id = %handle.id()))]
    async fn execute(&self, handle: Arc<JobHandle>, connectors: Vec<Arc<dyn SourceConnector>>) {
        let job_id = handle.id();
        let steps = (connectors.len() + 2) as f64;

        // ── 1. Query every source ────────────────────────────────────────────
        let skipped = self.fetch_sources(&handle, &connectors, steps).await;
        if skipped > 0 {
            let message = format!("cancelled: {skipped} source(s) not attempted");
            let progress = handle
                .update(|job| {
                    job.record_error(message.clone());
                    job.progress()
                })
                .await;
            self.emit(job_id, JobStage::Cancelled, None, message, progress);
        }

        // ── 2. Record linkage ────────────────────────────────────────────────
        let outcome = match self.link(&handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("record linkage failed: {e}");
                handle.update(|job| job.fail(message.clone())).await;
                self.emit(job_id, JobStage::Failed, None, message, 0.0);
                return;
            }
        };
        let (unique, report) = (outcome.unique.clone(), outcome.report.clone());
        let progress = handle
            .update(|job| {
                job.apply_linkage(outcome);
                job.set_progress((steps - 1.0) / steps);
                job.progress()
            })
            .await;
        self.emit(
            job_id,
            JobStage::Linkage,
            None,
            format!("{} unique, {} duplicates", unique.len(), report.total_duplicates()),
            progress,
        );

        // ── 3. Export ────────────────────────────────────────────────────────
        let formats = handle.read(|job| job.formats.clone()).await;
        if !formats.is_empty() {
            let dir = self.config.output.dir.clone();
            let written = tokio::task::spawn_blocking(move || {
                export::export_all(&dir, &job_id, &formats, &unique, &report)
            })
            .await;
            let progress = handle
                .update(|job| {
                    match written {
                        Ok(outcome) => {
                            for path in outcome.files {
                                job.add_exported_file(path);
                            }
                            for e in outcome.errors {
                                job.record_error(e.to_string());
                            }
                        }
                        Err(e) => job.record_error(
                            LitlinkError::Export(format!("task failed: {e}")).to_string(),
                        ),
                    }
                    job.set_progress(steps / steps);
                    job.progress()
                })
                .await;
            self.emit(job_id, JobStage::Export, None, "Export finished".to_string(), progress);
        }

        // ── 4. Done ──────────────────────────────────────────────────────────
        let snapshot = handle
            .update(|job| {
                job.complete();
                job.snapshot()
            })
            .await;
        self.emit(
            job_id,
            JobStage::Completed,
            None,
            format!(
                "{} downloaded, {} unique, {} duplicates",
                snapshot.total_downloaded, snapshot.total_unique, snapshot.total_duplicates
            ),
            snapshot.progress,
        );
    }

    /// Query every connector, at most `max_concurrent_sources` at a time.
    /// Results are folded into the job by this task only. Returns how many
    /// sources were skipped because of cancellation.
    async fn fetch_sources(
        &self,
        handle: &Arc<JobHandle>,
        connectors: &[Arc<dyn SourceConnector>],
        steps: f64,
    ) -> usize {
        let job_id = handle.id();
        let request = handle
            .read(|job| {
                let mut req = SearchRequest::new(job.query.clone(), job.max_results);
                if let Some(range) = job.year_range {
                    req = req.with_years(range);
                }
                req
            })
            .await;
        let limit = self.config.orchestrator.max_concurrent_sources.max(1);

        let mut calls = Vec::with_capacity(connectors.len());
        for connector in connectors.iter().cloned() {
            let handle = handle.clone();
            let request = request.clone();
            calls.push(async move {
                let name = connector.name().to_string();
                if handle.is_cancelled() {
                    return (name, SourceOutcome::NotAttempted);
                }
                handle.update(|job| job.set_current_source(Some(&name))).await;
                debug!(source = %name, "Querying source");
                let search = AssertUnwindSafe(connector.search(&request));
                let outcome = match FutureExt::catch_unwind(search).await {
                    Ok(Ok(records)) => SourceOutcome::Fetched(records),
                    Ok(Err(e)) => SourceOutcome::Failed(e),
                    Err(payload) => SourceOutcome::Panicked(panic_message(&*payload)),
                };
                (name, outcome)
            });
        }
        let mut results = stream::iter(calls).buffer_unordered(limit);

        let mut completed = 0usize;
        let mut skipped = 0usize;
        while let Some((name, outcome)) = results.next().await {
            let (stage, message) = match outcome {
                SourceOutcome::NotAttempted => {
                    skipped += 1;
                    continue;
                }
                SourceOutcome::Fetched(records) => {
                    info!(source = %name, n = records.len(), "Records retrieved");
                    let message = format!("{} records", records.len());
                    handle.update(|job| job.record_source_result(&name, records)).await;
                    (JobStage::SourceCompleted, message)
                }
                SourceOutcome::Failed(e) => {
                    let message = format!("{name}: {e}");
                    handle
                        .update(|job| {
                            job.mark_attempted(&name);
                            job.record_error(message.clone());
                        })
                        .await;
                    (JobStage::SourceFailed, message)
                }
                SourceOutcome::Panicked(cause) => {
                    let message = format!("{name}: connector panicked: {cause}");
                    handle
                        .update(|job| {
                            job.mark_attempted(&name);
                            job.record_error(message.clone());
                        })
                        .await;
                    (JobStage::SourceFailed, message)
                }
            };
            completed += 1;
            let progress = handle
                .update(|job| {
                    job.set_progress(completed as f64 / steps);
                    job.progress()
                })
                .await;
            self.emit(job_id, stage, Some(&name), message, progress);
        }

        handle.update(|job| job.set_current_source(None)).await;
        skipped
    }

    /// Run linkage off the async runtime; a panic inside it surfaces as an error.
    async fn link(&self, handle: &Arc<JobHandle>) -> Result<LinkageOutcome> {
        let per_source = self.config.orchestrator.per_source_dedup_first;
        let dedup = Deduplicator::new(self.config.linkage.clone());

        let outcome = if per_source {
            let buckets = handle.read(|job| job.bucket_records()).await;
            tokio::task::spawn_blocking(move || dedup.deduplicate_by_source(buckets)).await
        } else {
            let records = handle.read(|job| job.flattened_records()).await;
            tokio::task::spawn_blocking(move || dedup.deduplicate(records)).await
        };

        outcome.map_err(|e| {
            warn!(job_id = %handle.id(), error = %e, "Linkage task aborted");
            LitlinkError::Other(anyhow::anyhow!("linkage task aborted: {e}"))
        })
    }
}
