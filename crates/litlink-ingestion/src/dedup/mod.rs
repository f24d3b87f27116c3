//! Record linkage engine and its duplicate report.

pub mod engine;
pub mod normalise;
pub mod report;
pub mod similarity;

pub use engine::{Classification, Deduplicator, LinkageIndex, LinkageOutcome};
pub use report::{DuplicateEntry, DuplicateReason, DuplicateReport, DuplicateReportBuilder, RecordRef};
pub use similarity::ratcliff_obershelp;
