//! Batch analysis over saved record files.
//!
//! Every file is parsed on its own. A file with the wrong top-level shape is
//! rejected whole; a malformed feature inside an otherwise valid file is
//! skipped and counted. Nothing here touches the filesystem except
//! [`InputFile::read`].

use std::path::Path;

use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SurveyError, SurveyResult};
use crate::geojson;
use crate::projection::RecordRow;

mod stats;

pub use stats::{bucket_label, bucket_of, region_of, AggregateStats, BUCKET_WIDTH, UNKNOWN_REGION};

// ---

/// Raw contents of one batch input, labelled for error reporting.
#[derive(Debug, Clone)]
pub struct InputFile {
    // ---
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    // ---
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn read(path: &Path) -> SurveyResult<Self> {
        // ---
        let bytes = tokio::fs::read(path).await.map_err(|source| SurveyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

/// Per-file outcome for an accepted file, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    // ---
    /// Position among accepted files. Rows point back here by this index,
    /// since two inputs may share a display name.
    pub index: usize,
    pub name: String,
    /// Investigator of the first valid feature.
    pub investigator: Option<String>,
    pub records: usize,
    pub skipped_features: usize,
}

/// Everything one analysis run produces. Replaced wholesale on the next run.
#[derive(Debug, Default)]
pub struct BatchReport {
    // ---
    pub stats: AggregateStats,
    pub files: Vec<FileSummary>,
    pub rejected: Vec<SurveyError>,
    pub skipped_features: usize,
    /// Sorted by timestamp, then investigator.
    pub rows: Vec<RecordRow>,
}

impl BatchReport {
    // ---
    pub fn skipped_files(&self) -> usize {
        self.rejected.len()
    }
}

/// Folds input files into a [`BatchReport`], bucketing hours in `offset`.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    offset: FixedOffset,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl Aggregator {
    // ---
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    #[tracing::instrument(skip_all, fields(files = files.len()))]
    pub fn aggregate(&self, files: &[InputFile]) -> BatchReport {
        // ---
        let mut report = BatchReport::default();

        for file in files {
            let parsed = match geojson::parse_collection(&file.name, &file.bytes) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "rejecting input file");
                    report.rejected.push(e);
                    continue;
                }
            };

            debug!(
                file = %file.name,
                records = parsed.records.len(),
                skipped = parsed.skipped_features,
                "parsed input file"
            );

            let index = report.files.len();
            report.skipped_features += parsed.skipped_features;
            report.files.push(FileSummary {
                index,
                name: file.name.clone(),
                investigator: parsed.records.first().map(|r| r.investigator_name.clone()),
                records: parsed.records.len(),
                skipped_features: parsed.skipped_features,
            });

            for record in &parsed.records {
                report.stats.add(record, &self.offset);
                report
                    .rows
                    .push(RecordRow::from_record(record, &file.name, index, &self.offset));
            }
        }

        report.rows.sort_by(RecordRow::cmp_display_order);

        info!(
            records = report.stats.total(),
            rejected_files = report.skipped_files(),
            skipped_features = report.skipped_features,
            "aggregation complete"
        );
        report
    }
}

/// Aggregate with hours bucketed in UTC.
pub fn aggregate(files: &[InputFile]) -> BatchReport {
    Aggregator::default().aggregate(files)
}
