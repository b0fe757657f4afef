use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;
use tracing::{error, info};

use crate::domain::{Record, sanitize_name};
use crate::error::MofError;
use crate::pool::WorkerPool;

/// Identifier used for records carrying none of the id fields.
pub const FALLBACK_RECORD_ID: &str = "mof";

/// Directory layout shared by all stages, rooted at one data directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn json_root(&self) -> Utf8PathBuf {
        self.root.join("JSON")
    }

    pub fn cif_root(&self) -> Utf8PathBuf {
        self.root.join("CIF")
    }

    pub fn table_root(&self) -> Utf8PathBuf {
        self.root.join("MOF_ISO")
    }

    pub fn clean_root(&self) -> Utf8PathBuf {
        self.root.join("MOF_ISO_CLEAN")
    }

    pub fn json_dir(&self, collection: &str) -> Utf8PathBuf {
        self.json_root().join(sanitize_name(collection))
    }

    pub fn cif_dir(&self, collection: &str) -> Utf8PathBuf {
        self.cif_root().join(sanitize_name(collection))
    }

    pub fn table_dir(&self, collection: &str) -> Utf8PathBuf {
        self.table_root().join(sanitize_name(collection))
    }

    pub fn clean_dir(&self, collection: &str) -> Utf8PathBuf {
        self.clean_root().join(sanitize_name(collection))
    }

    /// `<root>/JSON/<collection>/<collection>_<id>.json`
    pub fn json_path(&self, collection: &str, record_id: &str) -> Utf8PathBuf {
        self.json_dir(collection)
            .join(artifact_name(collection, record_id, "json"))
    }

    /// `<root>/CIF/<collection>/<collection>_<id>.cif`
    pub fn cif_path(&self, collection: &str, record_id: &str) -> Utf8PathBuf {
        self.cif_dir(collection)
            .join(artifact_name(collection, record_id, "cif"))
    }
}

fn artifact_name(collection: &str, record_id: &str, ext: &str) -> String {
    format!(
        "{}_{}.{ext}",
        sanitize_name(collection),
        sanitize_name(record_id)
    )
}

/// Counts reported after persisting a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub total: usize,
    pub json_written: usize,
    pub cif_written: usize,
    pub failures: usize,
}

impl PersistReport {
    /// Records without a stored structure file, for whatever reason.
    pub fn missing_cif(&self) -> usize {
        self.total.saturating_sub(self.cif_written)
    }

    pub fn merge(&mut self, other: PersistReport) {
        self.total += other.total;
        self.json_written += other.json_written;
        self.cif_written += other.cif_written;
        self.failures += other.failures;
    }
}

/// What happened to one record. Document and structure writes are
/// independent; one failing does not skip the other.
#[derive(Debug)]
struct PersistOutcome {
    json: Result<(), MofError>,
    cif: Option<Result<(), MofError>>,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    layout: Layout,
    pool: WorkerPool,
}

impl RecordStore {
    pub fn new(layout: Layout, workers: usize) -> Self {
        Self::with_pool(layout, WorkerPool::new(workers))
    }

    /// Persists on an existing pool, so repeated batches reuse its threads.
    pub fn with_pool(layout: Layout, pool: WorkerPool) -> Self {
        Self { layout, pool }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Writes every record's document and, when present, its structure text.
    /// Failures are logged per record and never abort the batch.
    pub fn persist_all(&self, records: &[Record], collection: &str) -> PersistReport {
        let outcomes = self
            .pool
            .run(records, |record| self.persist_one(record, collection));

        let mut report = PersistReport {
            total: records.len(),
            ..PersistReport::default()
        };
        for outcome in outcomes {
            let mut failed = false;
            match outcome.json {
                Ok(()) => report.json_written += 1,
                Err(_) => failed = true,
            }
            match outcome.cif {
                Some(Ok(())) => report.cif_written += 1,
                Some(Err(_)) => failed = true,
                None => {}
            }
            if failed {
                report.failures += 1;
            }
        }

        info!(
            collection,
            total = report.total,
            json = report.json_written,
            cif = report.cif_written,
            missing_cif = report.missing_cif(),
            "records persisted"
        );
        report
    }

    fn persist_one(&self, record: &Record, collection: &str) -> PersistOutcome {
        let record_id = record.resolve_id(FALLBACK_RECORD_ID);

        let json_path = self.layout.json_path(collection, &record_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|err| MofError::Decode(format!("record {record_id}: {err}")))
            .and_then(|bytes| write_bytes_atomic(json_path.as_std_path(), &bytes));
        if let Err(err) = &json {
            error!(record = %record_id, error = %err, "failed to save JSON");
        }

        let cif = record.cif().map(|text| {
            let cif_path = self.layout.cif_path(collection, &record_id);
            let written = write_bytes_atomic(cif_path.as_std_path(), text.as_bytes());
            if let Err(err) = &written {
                error!(record = %record_id, error = %err, "failed to save CIF");
            }
            written
        });

        PersistOutcome { json, cif }
    }
}

/// Writes through a temp file in the target directory and renames it into
/// place, so readers and concurrent writers never see a partial file.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), MofError> {
    let parent = path.parent().ok_or_else(|| {
        MofError::Filesystem(format!("invalid destination path {}", path.display()))
    })?;
    fs::create_dir_all(parent)
        .map_err(|err| MofError::Filesystem(format!("create {}: {err}", parent.display())))?;
    let mut temp = Builder::new()
        .prefix(".mof-harvest")
        .tempfile_in(parent)
        .map_err(|err| MofError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| MofError::Filesystem(format!("write {}: {err}", path.display())))?;
    temp.persist(path)
        .map_err(|err| MofError::Filesystem(format!("persist {}: {err}", path.display())))?;
    Ok(())
}

/// Files directly inside `dir` with the given extension, sorted by name.
pub fn list_files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, MofError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| MofError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| MofError::Filesystem(err.to_string()))?
            .path();
        if path.is_file() && path.extension().map(|e| e == ext).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// True when `dir` exists and holds at least one entry.
pub fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
