//! Flattens the isotherms embedded in stored record documents into one CSV
//! table per measurement series.
//!
//! Every table starts with a fixed metadata block, one `key,value` line per
//! entry of [`METADATA_KEYS`], then a blank line, the column header and the
//! points sorted by pressure:
//!
//! ```text
//! MOF_ID,X1
//! Database,Demo
//! Surface_area_m2g,12.5
//! Surface_area_m2cm3,0.0
//! Adsorbate,N/A
//! Temperature,298
//!
//! Pressure (bar),Adsorption (mmol/g)
//! 1,0.5
//! 2,1.1
//! ```
//!
//! The cleaning stage reads the metadata block by line position.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::domain::{MeasurementSeries, resolve_record_id, sanitize_name, scalar_text};
use crate::error::MofError;
use crate::pool::WorkerPool;
use crate::store::{list_files_with_ext, write_bytes_atomic};

/// Keys of the metadata lines, in file order.
pub const METADATA_KEYS: [&str; 6] = [
    "MOF_ID",
    "Database",
    "Surface_area_m2g",
    "Surface_area_m2cm3",
    "Adsorbate",
    "Temperature",
];

pub const TABLE_EXT: &str = "csv";

/// Identifier used when a document carries none of the id fields.
pub const UNKNOWN_RECORD_ID: &str = "unknown_mof";

const MISSING_SURFACE_AREA: &str = "0.0";

/// Metadata shared by every table derived from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMeta {
    pub record_id: String,
    pub collection: String,
    pub surface_area_m2g: String,
    pub surface_area_m2cm3: String,
}

impl DocumentMeta {
    fn from_fields(fields: &serde_json::Map<String, Value>, collection: &str) -> Self {
        Self {
            record_id: sanitize_name(&resolve_record_id(fields, UNKNOWN_RECORD_ID)),
            collection: collection.to_string(),
            surface_area_m2g: surface_area_text(fields.get("surface_area_m2g")),
            surface_area_m2cm3: surface_area_text(fields.get("surface_area_m2cm3")),
        }
    }
}

fn surface_area_text(value: Option<&Value>) -> String {
    value
        .and_then(scalar_text)
        .unwrap_or_else(|| MISSING_SURFACE_AREA.to_string())
}

/// `<collection>_<recordId>_<seriesId>.csv`, every part sanitized.
pub fn table_file_name(collection: &str, record_id: &str, series_id: &str) -> String {
    format!(
        "{}_{}_{}.{TABLE_EXT}",
        sanitize_name(collection),
        sanitize_name(record_id),
        sanitize_name(series_id)
    )
}

/// Renders the complete table text for one series.
pub fn render_table(meta: &DocumentMeta, series: &MeasurementSeries) -> String {
    let values = [
        meta.record_id.clone(),
        meta.collection.clone(),
        meta.surface_area_m2g.clone(),
        meta.surface_area_m2cm3.clone(),
        series.adsorbate_label(),
        series.temperature.clone(),
    ];

    let mut out = String::new();
    for (key, value) in METADATA_KEYS.iter().zip(values.iter()) {
        out.push_str(&format!("{key},{value}\n"));
    }
    out.push('\n');
    out.push_str(&format!(
        "Pressure ({}),Adsorption ({})\n",
        series.pressure_unit, series.adsorption_unit
    ));
    for point in &series.points {
        out.push_str(&format!("{},{}\n", point.pressure, point.adsorption));
    }
    out
}

/// Normalizes the `isotherms` field: a single object counts as a one-element
/// list; absent, null and empty values yield nothing.
fn isotherm_values(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(object @ Value::Object(_)) => vec![object],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            debug!(kind = ?other, "isotherms field is neither list nor object");
            Vec::new()
        }
    }
}

fn load_document(path: &Path) -> Result<serde_json::Map<String, Value>, MofError> {
    let content = fs::read_to_string(path)
        .map_err(|err| MofError::Filesystem(format!("read {}: {err}", path.display())))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|err| MofError::Decode(format!("{}: {err}", path.display())))?;
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(MofError::Decode(format!(
            "{}: document is not an object",
            path.display()
        ))),
    }
}

/// Writes one table per isotherm of the document and returns how many were
/// written. Unreadable documents yield 0; a failing series is logged and its
/// siblings are still written.
pub fn extract_from_document(document_path: &Path, collection: &str, output_dir: &Path) -> usize {
    let fields = match load_document(document_path) {
        Ok(fields) => fields,
        Err(err) => {
            error!(error = %err, "failed to read document");
            return 0;
        }
    };

    let isotherms = isotherm_values(fields.get("isotherms"));
    if isotherms.is_empty() {
        return 0;
    }

    let meta = DocumentMeta::from_fields(&fields, collection);
    let folder = output_dir.join(sanitize_name(collection));

    let mut count = 0;
    for (index, value) in isotherms.into_iter().enumerate() {
        let Some(series) = MeasurementSeries::from_value(value, index) else {
            continue;
        };
        let path = folder.join(table_file_name(
            collection,
            &meta.record_id,
            &series.series_id,
        ));
        match write_bytes_atomic(&path, render_table(&meta, &series).as_bytes()) {
            Ok(()) => count += 1,
            Err(err) => error!(
                series = %series.series_id,
                document = %document_path.display(),
                error = %err,
                "failed to write isotherm table"
            ),
        }
    }
    count
}

/// Extracts every stored document of a collection on `pool` and returns the
/// number of tables written. A missing or empty
/// document directory is reported and counts as no work.
pub fn process_collection(
    collection: &str,
    json_root: &Path,
    output_dir: &Path,
    pool: &WorkerPool,
) -> usize {
    let json_dir = json_root.join(sanitize_name(collection));
    if !json_dir.is_dir() {
        warn!(dir = %json_dir.display(), "JSON folder not found");
        return 0;
    }
    let documents = match list_files_with_ext(&json_dir, "json") {
        Ok(documents) => documents,
        Err(err) => {
            error!(error = %err, "failed to list documents");
            return 0;
        }
    };
    if documents.is_empty() {
        warn!(dir = %json_dir.display(), "no JSON files found");
        return 0;
    }

    info!(collection, documents = documents.len(), "extracting isotherms");
    let counts = pool.run(&documents, |path| {
        extract_from_document(path, collection, output_dir)
    });
    let total: usize = counts.into_iter().sum();
    info!(collection, tables = total, "extraction finished");
    total
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_fixed_header_block() {
        let meta = DocumentMeta {
            record_id: "X1".to_string(),
            collection: "Demo".to_string(),
            surface_area_m2g: "12.5".to_string(),
            surface_area_m2cm3: "0.0".to_string(),
        };
        let series = MeasurementSeries::from_value(
            &json!({
                "pressureUnits": "bar",
                "adsorptionUnits": "mmol/g",
                "temperature": 298,
                "adsorbates": [{"name": "CO2"}, {"name": "N2"}],
                "isotherm_data": [
                    {"pressure": 2, "total_adsorption": 1.1},
                    {"pressure": 1, "total_adsorption": 0.5}
                ]
            }),
            0,
        )
        .unwrap();

        let text = render_table(&meta, &series);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "MOF_ID,X1",
                "Database,Demo",
                "Surface_area_m2g,12.5",
                "Surface_area_m2cm3,0.0",
                "Adsorbate,CO2;N2",
                "Temperature,298",
                "",
                "Pressure (bar),Adsorption (mmol/g)",
                "1,0.5",
                "2,1.1",
            ]
        );
    }

    #[test]
    fn single_object_counts_as_list() {
        let value = json!({"id": 1});
        assert_eq!(isotherm_values(Some(&value)).len(), 1);
        assert!(isotherm_values(Some(&json!([]))).is_empty());
        assert!(isotherm_values(None).is_empty());
    }

    #[test]
    fn table_name_sanitizes_parts() {
        assert_eq!(
            table_file_name("CoREMOF 2019", "A B", "10.1021/x"),
            "CoREMOF_2019_A_B_10.1021_x.csv"
        );
    }
}
