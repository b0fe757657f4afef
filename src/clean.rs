use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::domain::NOT_AVAILABLE;
use crate::error::MofError;
use crate::extract::{METADATA_KEYS, TABLE_EXT};
use crate::store::write_bytes_atomic;

/// One row of the summary table. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    #[serde(rename = "File")]
    pub relative_path: String,
    #[serde(rename = "MOF_ID")]
    pub record_id: String,
    #[serde(rename = "Database")]
    pub collection: String,
    #[serde(rename = "Adsorbate")]
    pub adsorbate: String,
    #[serde(rename = "Temperature")]
    pub temperature: String,
    #[serde(rename = "Surface_area_m2g")]
    pub surface_area_m2g: f64,
    #[serde(rename = "Surface_area_m2cm3")]
    pub surface_area_m2cm3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningResult {
    pub total_files: usize,
    pub kept_files: usize,
    pub removed_files: usize,
    /// `None` when nothing was kept; no summary file is written then.
    pub summary_path: Option<PathBuf>,
}

/// Metadata block of a table file.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub record_id: String,
    pub collection: String,
    pub surface_area_m2g: f64,
    pub surface_area_m2cm3: f64,
    pub adsorbate: String,
    pub temperature: String,
}

impl TableMeta {
    /// Parses the first six lines of a table. Returns `None` when fewer are
    /// given.
    pub fn from_lines(lines: &[String]) -> Option<Self> {
        if lines.len() < METADATA_KEYS.len() {
            return None;
        }
        Some(Self {
            record_id: second_field(&lines[0], "unknown"),
            collection: second_field(&lines[1], "unknown"),
            surface_area_m2g: parse_area(&lines[2]),
            surface_area_m2cm3: parse_area(&lines[3]),
            adsorbate: second_field(&lines[4], NOT_AVAILABLE),
            temperature: second_field(&lines[5], NOT_AVAILABLE),
        })
    }

    /// A table is kept only when its gravimetric surface area is a finite
    /// positive number.
    pub fn is_admitted(&self) -> bool {
        self.surface_area_m2g.is_finite() && self.surface_area_m2g > 0.0
    }
}

fn second_field(line: &str, default: &str) -> String {
    line.trim()
        .split(',')
        .nth(1)
        .unwrap_or(default)
        .to_string()
}

fn parse_area(line: &str) -> f64 {
    line.trim()
        .split(',')
        .nth(1)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn read_header_lines(path: &Path) -> Result<Vec<String>, MofError> {
    let file = File::open(path)
        .map_err(|err| MofError::Filesystem(format!("open {}: {err}", path.display())))?;
    BufReader::new(file)
        .lines()
        .take(METADATA_KEYS.len())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| MofError::Decode(format!("{}: {err}", path.display())))
}

fn is_table(path: &Path) -> bool {
    path.extension().map(|ext| ext == TABLE_EXT).unwrap_or(false)
}

/// Summary `File` column: path relative to the output root, `/`-separated.
fn summary_path_text(relative: &Path) -> String {
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decides one table and copies it when admitted.
fn clean_one(
    path: &Path,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<Option<SummaryEntry>, MofError> {
    let lines = read_header_lines(path)?;
    let Some(meta) = TableMeta::from_lines(&lines) else {
        debug!(file = %path.display(), "table shorter than metadata block");
        return Ok(None);
    };
    if !meta.is_admitted() {
        debug!(file = %path.display(), "no surface area");
        return Ok(None);
    }

    let relative = path
        .strip_prefix(input_dir)
        .map_err(|err| MofError::Filesystem(err.to_string()))?;
    let target = output_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| MofError::Filesystem(format!("create {}: {err}", parent.display())))?;
    }
    fs::copy(path, &target)
        .map_err(|err| MofError::Filesystem(format!("copy {}: {err}", path.display())))?;

    Ok(Some(SummaryEntry {
        relative_path: summary_path_text(relative),
        record_id: meta.record_id,
        collection: meta.collection,
        adsorbate: meta.adsorbate,
        temperature: meta.temperature,
        surface_area_m2g: meta.surface_area_m2g,
        surface_area_m2cm3: meta.surface_area_m2cm3,
    }))
}

pub fn render_summary(entries: &[SummaryEntry]) -> Result<Vec<u8>, MofError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for entry in entries {
        writer
            .serialize(entry)
            .map_err(|err| MofError::Filesystem(format!("summary row: {err}")))?;
    }
    writer
        .into_inner()
        .map_err(|err| MofError::Filesystem(format!("summary: {err}")))
}

/// Copies every admitted table under `input_dir` to the same relative path
/// under `output_dir` and writes `output_dir/<summary_file>` listing them.
///
/// Rejected and unreadable tables are counted, not raised. The only error is
/// failing to write the summary itself.
pub fn clean_collection(
    input_dir: &Path,
    output_dir: &Path,
    summary_file: &str,
) -> Result<CleaningResult, MofError> {
    if !input_dir.is_dir() {
        warn!(dir = %input_dir.display(), "table folder not found");
    }

    let mut total_files = 0;
    let mut entries = Vec::new();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if input_dir.is_dir() {
                    warn!(error = %err, "skipping unreadable entry");
                }
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_table(entry.path()) {
            continue;
        }
        total_files += 1;
        match clean_one(entry.path(), input_dir, output_dir) {
            Ok(Some(summary)) => entries.push(summary),
            Ok(None) => {}
            Err(err) => error!(error = %err, "failed to clean table"),
        }
    }

    let kept_files = entries.len();
    let summary_path = if entries.is_empty() {
        None
    } else {
        let path = output_dir.join(summary_file);
        write_bytes_atomic(&path, &render_summary(&entries)?)?;
        Some(path)
    };

    info!(
        input = %input_dir.display(),
        total = total_files,
        kept = kept_files,
        removed = total_files - kept_files,
        "cleaning finished"
    );
    Ok(CleaningResult {
        total_files,
        kept_files,
        removed_files: total_files - kept_files,
        summary_path,
    })
}
