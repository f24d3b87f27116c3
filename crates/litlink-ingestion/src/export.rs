//! File export of a finished job: the unified record set in each requested
//! format plus the duplicate report as JSON.
//!
//! File names: `{job_id}_{timestamp}_unified.{ext}` and
//! `{job_id}_{timestamp}_duplicates.json`, timestamp `%Y%m%d_%H%M%S` UTC.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use litlink_common::{LitlinkError, Result};
use tracing::{debug, info};

use crate::dedup::DuplicateReport;
use crate::job::JobId;
use crate::models::PublicationRecord;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub trait Exporter: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &str;

    fn write(&self, records: &[PublicationRecord], path: &Path) -> Result<()>;
}

/// Pretty-printed JSON array.
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn extension(&self) -> &str {
        "json"
    }

    fn write(&self, records: &[PublicationRecord], path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, records)?;
        out.flush()?;
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonLinesExporter;

impl Exporter for JsonLinesExporter {
    fn extension(&self) -> &str {
        "jsonl"
    }

    fn write(&self, records: &[PublicationRecord], path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for record in records {
            serde_json::to_writer(&mut out, record)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}

pub fn exporter_for(format: &str) -> Option<Box<dyn Exporter>> {
    match format.trim().to_lowercase().as_str() {
        "json" => Some(Box::new(JsonExporter)),
        "jsonl" | "ndjson" => Some(Box::new(JsonLinesExporter)),
        _ => None,
    }
}

pub fn file_stem(job_id: &JobId, at: DateTime<Utc>) -> String {
    format!("{}_{}", job_id, at.format(TIMESTAMP_FORMAT))
}

pub fn write_report(dir: &Path, stem: &str, report: &DuplicateReport) -> Result<PathBuf> {
    let path = dir.join(format!("{stem}_duplicates.json"));
    let mut out = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut out, &report.to_export())?;
    out.flush()?;
    Ok(path)
}

/// Files written plus the per-format failures, which are non-fatal.
#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub files: Vec<PathBuf>,
    pub errors: Vec<LitlinkError>,
}

/// Write every requested format and the duplicate report into `dir`.
/// A failing format does not stop the others.
pub fn export_all(
    dir: &Path,
    job_id: &JobId,
    formats: &[String],
    records: &[PublicationRecord],
    report: &DuplicateReport,
) -> ExportOutcome {
    let mut outcome = ExportOutcome::default();

    if let Err(e) = fs::create_dir_all(dir) {
        outcome
            .errors
            .push(LitlinkError::Export(format!("cannot create {}: {e}", dir.display())));
        return outcome;
    }

    let stem = file_stem(job_id, Utc::now());

    for format in formats {
        let Some(exporter) = exporter_for(format) else {
            outcome
                .errors
                .push(LitlinkError::Export(format!("format '{format}' is not supported")));
            continue;
        };
        let path = dir.join(format!("{stem}_unified.{}", exporter.extension()));
        match exporter.write(records, &path) {
            Ok(()) => {
                debug!(path = %path.display(), n = records.len(), "Unified export written");
                outcome.files.push(path);
            }
            Err(e) => outcome.errors.push(LitlinkError::Export(format!("{format}: {e}"))),
        }
    }

    match write_report(dir, &stem, report) {
        Ok(path) => outcome.files.push(path),
        Err(e) => outcome
            .errors
            .push(LitlinkError::Export(format!("duplicate report: {e}"))),
    }

    info!(
        job_id = %job_id,
        files = outcome.files.len(),
        failures = outcome.errors.len(),
        "Export finished"
    );
    outcome
}
