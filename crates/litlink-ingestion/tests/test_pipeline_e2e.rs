//! End-to-end orchestrator runs against scripted in-memory connectors.
//!
//! Run with: cargo test --package litlink-ingestion --test test_pipeline_e2e

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use litlink_common::LitlinkError;
use litlink_config::LitlinkConfig;
use litlink_ingestion::pipeline::JobStage;
use litlink_ingestion::{ConnectorRegistry, JobRegistry, JobRequest, JobStatus, UnifiedDownloader};
use litlink_test_utils::*;
use pretty_assertions::assert_eq;

fn config(output_dir: &std::path::Path) -> LitlinkConfig {
    let mut config = LitlinkConfig::default();
    config.output.dir = output_dir.to_path_buf();
    config.output.formats = vec![];
    config
}

fn downloader(config: LitlinkConfig, registry: ConnectorRegistry) -> UnifiedDownloader {
    UnifiedDownloader::new(config, registry, Arc::new(JobRegistry::new()))
}

#[tokio::test]
async fn test_partial_failure_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("sourceA", distinct_records(5, "sourceA")));
    registry.register(FailingConnector::new("sourceB", "HTTP 503: unavailable"));

    let snapshot = downloader(config(dir.path()), registry)
        .run_job(JobRequest::new("anything", &["sourceA", "sourceB"]))
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.total_downloaded, 5);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors[0].starts_with("sourceB: "), "{:?}", snapshot.errors);
    assert_eq!(snapshot.progress, 1.0);
    assert_eq!(snapshot.current_source, None);
    assert_totals_balance(&snapshot);
}

#[tokio::test]
async fn test_four_record_scenario_across_sources() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new(
        "crossref",
        vec![
            record("Deep learning for genomics", Some("10.1145/123456"), "crossref"),
            record("Graph neural networks for protein", None, "crossref"),
        ],
    ));
    registry.register(StaticConnector::new(
        "arxiv",
        vec![
            record("Deep Learning in Genomics (preprint)", Some("10.1145/123456"), "arxiv"),
            record("Graph neural networks for proteix", None, "arxiv"),
        ],
    ));

    let dl = downloader(config(dir.path()), registry);
    let snapshot = dl
        .run_job(JobRequest::new("genomics", &["crossref", "arxiv"]))
        .await
        .unwrap();

    assert_eq!(snapshot.total_downloaded, 4);
    assert_eq!(snapshot.total_unique, 2);
    assert_eq!(snapshot.total_duplicates, 2);
    assert_eq!(snapshot.per_source["crossref"], 2);
    assert_eq!(snapshot.per_source["arxiv"], 2);
    assert_totals_balance(&snapshot);

    let id = snapshot.job_id.parse().unwrap();
    let handle = dl.jobs().get(&id).await.unwrap();
    let (unique_sources, reasons) = handle
        .read(|job| {
            let sources: Vec<String> = job.unique().iter().map(|r| r.source.clone()).collect();
            let reasons: Vec<&'static str> = job
                .report()
                .map(|r| r.entries().iter().map(|e| e.reason.as_str()).collect())
                .unwrap_or_default();
            (sources, reasons)
        })
        .await;
    assert_eq!(unique_sources, ["crossref", "crossref"]);
    assert_eq!(reasons, ["exact_doi", "fuzzy_title"]);
}

#[tokio::test]
async fn test_unknown_sources_are_dropped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("crossref", distinct_records(2, "crossref")));

    let snapshot = downloader(config(dir.path()), registry)
        .run_job(JobRequest::new("q", &["CrossRef", "scopus"]))
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.sources, ["CrossRef", "scopus"]);
    assert_eq!(snapshot.errors, ["unknown source 'scopus' ignored"]);
    assert_eq!(snapshot.total_downloaded, 2);
}

#[tokio::test]
async fn test_no_valid_sources_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let connector = StaticConnector::new("crossref", distinct_records(2, "crossref"));
    let mut registry = ConnectorRegistry::new();
    registry.register(connector.clone());
    let dl = downloader(config(dir.path()), registry);

    let err = dl.run_job(JobRequest::new("q", &["scopus"])).await.unwrap_err();
    assert!(matches!(err, LitlinkError::Validation(ref m) if m == "no valid sources"));
    assert_eq!(connector.calls(), 0);

    let jobs = dl.jobs().list().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].errors.contains(&"no valid sources".to_string()));

    let err = dl.run_job(JobRequest::new("q", &[])).await.unwrap_err();
    assert!(matches!(err, LitlinkError::Validation(_)));
}

#[tokio::test]
async fn test_progress_events_are_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("a", distinct_records(3, "a")));
    registry.register(FailingConnector::new("b", "boom"));
    registry.register(StaticConnector::new("c", distinct_records(2, "c")));
    let dl = downloader(config(dir.path()), registry);
    let mut rx = dl.subscribe();

    dl.run_job(JobRequest::new("q", &["a", "b", "c"])).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let stages: Vec<JobStage> = events.iter().map(|e| e.stage).collect();
    assert_eq!(stages.first(), Some(&JobStage::Started));
    assert_eq!(stages.last(), Some(&JobStage::Completed));
    assert!(stages.contains(&JobStage::SourceFailed));
    assert!(stages.contains(&JobStage::Linkage));

    for pair in events.windows(2) {
        assert!(pair[1].progress >= pair[0].progress, "{:?} then {:?}", pair[0], pair[1]);
    }
    assert_eq!(events.last().unwrap().progress, 1.0);
}

#[tokio::test]
async fn test_export_writes_files_and_tolerates_unknown_format() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("exports");
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new(
        "crossref",
        vec![record("The Rise of AI", None, "crossref"), record("rise of ai", None, "crossref")],
    ));

    let dl = downloader(config(&out), registry);
    let mut rx = dl.subscribe();
    let snapshot = dl
        .run_job(JobRequest::new("ai", &["crossref"]).with_formats(&["json", "ris"]))
        .await
        .unwrap();

    // Sources, linkage and export are all done once the export event fires.
    let mut export_progress = None;
    while let Ok(event) = rx.try_recv() {
        if event.stage == JobStage::Export {
            export_progress = Some(event.progress);
        }
    }
    assert_eq!(export_progress, Some(1.0));

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.errors, ["export format 'ris' is not supported"]);
    assert_eq!(snapshot.exported_files.len(), 2);
    assert!(snapshot.exported_files[0].ends_with("_unified.json"));
    assert!(snapshot.exported_files[1].ends_with("_duplicates.json"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot.exported_files[1]).unwrap()).unwrap();
    assert_eq!(report["summary"]["total_duplicates_found"], 1);
    assert_eq!(report["summary"]["duplicates_by_hash"], 1);
    assert_eq!(report["duplicates"][0]["reason"], "normalized_title_hash");
    assert_eq!(report["duplicates"][0]["similarity_score"], 1.0);
}

#[tokio::test]
async fn test_cancel_stops_scheduling_remaining_sources() {
    let dir = tempfile::tempdir().unwrap();
    let gate = GatedConnector::new("gate", distinct_records(2, "gate"));
    let later = StaticConnector::new("later", distinct_records(4, "later"));
    let last = StaticConnector::new("last", distinct_records(4, "last"));
    let mut registry = ConnectorRegistry::new();
    registry.register(gate.clone());
    registry.register(later.clone());
    registry.register(last.clone());
    let dl = downloader(config(dir.path()), registry);

    let id = dl
        .start_job(JobRequest::new("q", &["gate", "later", "last"]))
        .await
        .unwrap();
    gate.started.notified().await;
    dl.cancel(&id).await.unwrap();
    gate.release.notify_one();

    let dl = &dl;
    let snapshot =
        wait_for_terminal(|| async move { dl.get_job_status(&id).await.unwrap() }, Duration::from_secs(5))
            .await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.total_downloaded, 2);
    assert_eq!(snapshot.errors, ["cancelled: 2 source(s) not attempted"]);
    assert_eq!(later.calls(), 0);
    assert_eq!(last.calls(), 0);
    assert_totals_balance(&snapshot);
}

#[tokio::test]
async fn test_bounded_parallelism() {
    let dir = tempfile::tempdir().unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = ConnectorRegistry::new();
    for name in ["s1", "s2", "s3", "s4"] {
        registry.register(DelayedConnector::new(
            name,
            Duration::from_millis(50),
            distinct_records(1, name),
            in_flight.clone(),
            peak.clone(),
        ));
    }
    let mut cfg = config(dir.path());
    cfg.orchestrator.max_concurrent_sources = 2;

    let snapshot = downloader(cfg, registry)
        .run_job(JobRequest::new("q", &["s1", "s2", "s3", "s4"]))
        .await
        .unwrap();

    assert_eq!(snapshot.total_downloaded, 4);
    assert_eq!(snapshot.per_source.len(), 4);
    assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_sequential_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = ConnectorRegistry::new();
    for name in ["s1", "s2", "s3"] {
        registry.register(DelayedConnector::new(
            name,
            Duration::from_millis(20),
            vec![],
            in_flight.clone(),
            peak.clone(),
        ));
    }

    let snapshot = downloader(config(dir.path()), registry)
        .run_job(JobRequest::new("q", &["s1", "s2", "s3"]))
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.total_downloaded, 0);
    assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_per_source_dedup_first_keeps_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new(
        "a",
        vec![
            record("Alpha study", Some("10.1/a"), "a"),
            record("Alpha study", Some("10.1/A"), "a"),
            record("Beta trial", None, "a"),
        ],
    ));
    registry.register(StaticConnector::new(
        "b",
        vec![record("ALPHA STUDY", None, "b"), record("Gamma cohort", None, "b")],
    ));
    let mut cfg = config(dir.path());
    cfg.orchestrator.per_source_dedup_first = true;

    let snapshot = downloader(cfg, registry)
        .run_job(JobRequest::new("q", &["a", "b"]))
        .await
        .unwrap();

    assert_eq!(snapshot.total_downloaded, 5);
    assert_eq!(snapshot.total_unique, 3);
    assert_eq!(snapshot.total_duplicates, 2);
    assert_totals_balance(&snapshot);
}

#[tokio::test]
async fn test_start_job_returns_before_completion_and_status_is_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("a", distinct_records(3, "a")));
    let dl = downloader(config(dir.path()), registry);

    let id = dl.start_job(JobRequest::new("q", &["a"])).await.unwrap();
    let early = dl.get_job_status(&id).await.unwrap();
    assert!(matches!(early.status, JobStatus::Running | JobStatus::Completed));

    let dl = &dl;
    let done =
        wait_for_terminal(|| async move { dl.get_job_status(&id).await.unwrap() }, Duration::from_secs(5))
            .await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.total_unique, 3);

    let missing = dl.get_job_status(&uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, LitlinkError::JobNotFound(_)));
}

#[tokio::test]
async fn test_panicking_connector_is_recorded_and_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("a", distinct_records(2, "a")));
    registry.register(PanickingConnector::new("panicky"));
    let dl = downloader(config(dir.path()), registry);

    let id = dl.start_job(JobRequest::new("q", &["a", "panicky"])).await.unwrap();
    let dl = &dl;
    let snapshot =
        wait_for_terminal(|| async move { dl.get_job_status(&id).await.unwrap() }, Duration::from_secs(5))
            .await;

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.total_downloaded, 2);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(
        snapshot.errors[0].starts_with("panicky: connector panicked: panicky exploded"),
        "{:?}",
        snapshot.errors
    );
    assert_eq!(snapshot.progress, 1.0);
    assert_totals_balance(&snapshot);
}

#[tokio::test]
async fn test_unlinkable_record_is_reported_and_totals_balance() {
    let dir = tempfile::tempdir().unwrap();
    // Connectors may hand-build records that bypass ingest validation.
    let mut odd = record("placeholder", None, "a");
    odd.title = "???".to_string();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new("a", vec![odd, record("Real paper", None, "a")]));

    let snapshot = downloader(config(dir.path()), registry)
        .run_job(JobRequest::new("q", &["a"]))
        .await
        .unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.total_downloaded, 2);
    assert_eq!(snapshot.total_unique, 1);
    assert_eq!(snapshot.total_skipped, 1);
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.errors[0].contains("skipped"), "{:?}", snapshot.errors);
    assert_totals_balance(&snapshot);
}

#[tokio::test]
async fn test_author_gate_separates_same_title_different_authors() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = ConnectorRegistry::new();
    registry.register(StaticConnector::new(
        "a",
        vec![record_with_authors(
            "Neural scaling laws for language models",
            &["Jared Kaplan", "Sam McCandlish"],
            "a",
        )],
    ));
    registry.register(StaticConnector::new(
        "b",
        vec![
            record_with_authors(
                "Neural scaling laws for language model",
                &["Jared Kaplan", "Tom Henighan"],
                "b",
            ),
            record_with_authors(
                "Neural scaling law for language models",
                &["Ada Lovelace"],
                "b",
            ),
        ],
    ));
    let mut cfg = config(dir.path());
    cfg.linkage.use_author_overlap = true;
    cfg.linkage.similarity_threshold = 0.9;

    let snapshot = downloader(cfg, registry)
        .run_job(JobRequest::new("q", &["a", "b"]))
        .await
        .unwrap();

    assert_eq!(snapshot.total_downloaded, 3);
    assert_eq!(snapshot.total_duplicates, 1);
    assert_eq!(snapshot.total_unique, 2);
    assert_totals_balance(&snapshot);
}
