//! litlink-ingestion: Multi-source acquisition and record linkage.
//! - Publication record model
//! - Source connectors (CrossRef, Europe PMC, PubMed, arXiv) behind one trait
//! - Record linkage (DOI, normalised-title hash, fuzzy title)
//! - Acquisition jobs, job registry and the unified downloader
//! - Export of the unified set and the duplicate report

pub mod models;
pub mod http;
pub mod sources;
pub mod dedup;
pub mod job;
pub mod registry;
pub mod export;
pub mod pipeline;

pub use dedup::{Classification, Deduplicator, DuplicateReason, DuplicateReport, LinkageOutcome};
pub use job::{AcquisitionJob, JobId, JobSnapshot, JobStatus};
pub use models::{Author, PublicationRecord, RecordDraft, YearRange};
pub use pipeline::{JobEvent, JobRequest, JobStage, UnifiedDownloader};
pub use registry::{JobHandle, JobRegistry};
pub use sources::{ConnectorRegistry, SearchRequest, SourceConnector, SourceError};
