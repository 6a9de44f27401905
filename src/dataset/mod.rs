pub mod resolve;
pub mod types;

pub use types::{group_rows, DatasetRow, PullRequestGroup};

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::DatasetConfig;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dataset I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dataset has none of the expected {kind} columns: {candidates:?}")]
    MissingColumn {
        kind: &'static str,
        candidates: Vec<String>,
    },

    #[error("Row {idx}: unrecognised test identifier {identifier:?}")]
    UnresolvedIdentifier { idx: usize, identifier: String },
}

/// The input table, held as raw records so the verified subset can be
/// written back out with the original columns untouched.
#[derive(Debug)]
pub struct Dataset {
    headers: csv::StringRecord,
    records: Vec<csv::StringRecord>,
    url_column: usize,
    identifier_column: usize,
}

/// Rows ready for scheduling plus the ones dropped while resolving.
#[derive(Debug)]
pub struct ResolvedRows {
    pub rows: Vec<DatasetRow>,
    /// Rows without a pull request link.
    pub missing_url: usize,
    pub unresolved: Vec<DatasetError>,
}

impl Dataset {
    /// Load a CSV file from disk.
    #[instrument(skip(columns), fields(path = %path.display()))]
    pub fn load(path: &Path, columns: &DatasetConfig) -> Result<Dataset, DatasetError> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(file, columns)?;
        debug!(rows = dataset.len(), "loaded dataset");
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R, columns: &DatasetConfig) -> Result<Dataset, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let url_column = find_column(&headers, &columns.url_columns).ok_or_else(|| {
            DatasetError::MissingColumn {
                kind: "pull request url",
                candidates: columns.url_columns.clone(),
            }
        })?;
        let identifier_column = find_column(&headers, &columns.identifier_columns).ok_or_else(|| {
            DatasetError::MissingColumn {
                kind: "test identifier",
                candidates: columns.identifier_columns.clone(),
            }
        })?;

        let records = rdr.records().collect::<Result<Vec<_>, _>>()?;

        Ok(Dataset {
            headers,
            records,
            url_column,
            identifier_column,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Turn every record into a [`DatasetRow`]. Rows without a link are
    /// skipped silently; rows whose identifier cannot be resolved are reported
    /// and never reach the pipeline.
    pub fn resolve_rows(&self) -> ResolvedRows {
        let mut rows = Vec::new();
        let mut missing_url = 0;
        let mut unresolved = Vec::new();

        for (idx, record) in self.records.iter().enumerate() {
            let url = record.get(self.url_column).unwrap_or("").trim();
            if url.is_empty() {
                missing_url += 1;
                continue;
            }
            let identifier = record.get(self.identifier_column).unwrap_or("").trim();
            match resolve::resolve(identifier) {
                Some(names) => rows.push(DatasetRow {
                    idx,
                    pull_request_url: url.to_string(),
                    test_identifier: identifier.to_string(),
                    short_filename: names.short_filename,
                    qualified_filename: names.qualified_filename,
                    package_path: names.package_path,
                }),
                None => {
                    let err = DatasetError::UnresolvedIdentifier {
                        idx,
                        identifier: identifier.to_string(),
                    };
                    warn!(%err, "dropping row");
                    unresolved.push(err);
                }
            }
        }

        ResolvedRows {
            rows,
            missing_url,
            unresolved,
        }
    }

    /// Write the header plus every record whose index is in `verified`.
    /// Returns the number of records written.
    pub fn write_subset<W: Write>(&self, verified: &BTreeSet<usize>, writer: W) -> Result<usize, DatasetError> {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        wtr.write_record(&self.headers)?;
        let mut written = 0;
        for (idx, record) in self.records.iter().enumerate() {
            if verified.contains(&idx) {
                wtr.write_record(record)?;
                written += 1;
            }
        }
        wtr.flush()?;
        Ok(written)
    }

    #[instrument(skip(self, verified), fields(path = %path.display(), verified = verified.len()))]
    pub fn write_subset_to(&self, verified: &BTreeSet<usize>, path: &Path) -> Result<usize, DatasetError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.write_subset(verified, file)
    }
}

fn find_column(headers: &csv::StringRecord, candidates: &[String]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|name| headers.iter().position(|h| h.trim() == name))
}
