use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MofError;

/// Field candidates for a record identifier, highest priority first.
pub const RECORD_ID_FIELDS: [&str; 4] = ["mofid", "mofkey", "id", "name"];

/// Field candidates for an isotherm identifier. The positional index is the
/// last resort and is only unique within the parent record.
pub const SERIES_ID_FIELDS: [&str; 2] = ["id", "DOI"];

const PRESSURE_UNIT_FIELDS: [&str; 3] = ["pressureUnits", "pressure_unit", "pressure_units"];
const ADSORPTION_UNIT_FIELDS: [&str; 3] =
    ["adsorptionUnits", "adsorption_unit", "adsorption_units"];

pub const NOT_AVAILABLE: &str = "N/A";

/// Replaces characters that cannot appear in a single path component.
///
/// Every stage derives directory and file names through this function, so a
/// collection written by one stage is always found under the same name by the
/// next one. Applying it twice yields the same result as applying it once.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    /// Count reported by the catalog. Advisory only.
    pub declared_count: u64,
}

impl Collection {
    pub fn new(name: impl Into<String>, declared_count: u64) -> Self {
        Self {
            name: name.into(),
            declared_count,
        }
    }

    pub fn dir_name(&self) -> String {
        sanitize_name(&self.name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One catalog document, kept verbatim so it can be persisted unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wraps a JSON value; anything but an object is not a record.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Best-effort identifier, `fallback` when no candidate field is set.
    pub fn resolve_id(&self, fallback: &str) -> String {
        resolve_record_id(&self.0, fallback)
    }

    /// Raw crystallographic structure text, when the record carries any.
    pub fn cif(&self) -> Option<&str> {
        self.0
            .get("cif")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }
}

/// Text of a JSON scalar if it counts as "set": non-empty strings, non-zero
/// numbers and `true`. Null, empty strings, zero and containers never match.
pub fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if number.as_f64().map(|v| v != 0.0).unwrap_or(true) => {
            Some(number.to_string())
        }
        Value::Bool(true) => Some("True".to_string()),
        _ => None,
    }
}

/// Returns the first candidate field holding a non-empty value.
pub fn first_non_empty(fields: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| fields.get(*key).and_then(non_empty_text))
}

pub fn resolve_record_id(fields: &Map<String, Value>, fallback: &str) -> String {
    first_non_empty(fields, &RECORD_ID_FIELDS).unwrap_or_else(|| fallback.to_string())
}

pub fn resolve_series_id(fields: &Map<String, Value>, index: usize) -> String {
    first_non_empty(fields, &SERIES_ID_FIELDS).unwrap_or_else(|| index.to_string())
}

/// One pressure/adsorption pair. The JSON numbers are kept verbatim so the
/// table shows them exactly as the catalog reported them.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub pressure: serde_json::Number,
    pub adsorption: serde_json::Number,
}

impl Point {
    pub fn pressure_value(&self) -> f64 {
        self.pressure.as_f64().unwrap_or(f64::NAN)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let pressure = value.get("pressure").and_then(as_number)?;
        let adsorption = value.get("total_adsorption").and_then(as_number)?;
        Some(Self {
            pressure,
            adsorption,
        })
    }
}

fn as_number(value: &Value) -> Option<serde_json::Number> {
    match value {
        Value::Number(number) => Some(number.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSeries {
    pub series_id: String,
    pub pressure_unit: String,
    pub adsorption_unit: String,
    pub temperature: String,
    pub adsorbate_names: Vec<String>,
    /// Sorted ascending by pressure.
    pub points: Vec<Point>,
}

impl MeasurementSeries {
    /// Builds a series from one element of a record's `isotherms` field.
    /// Returns `None` for elements that are not objects.
    pub fn from_value(value: &Value, index: usize) -> Option<Self> {
        let fields = value.as_object()?;

        let pressure_unit = first_text(fields, &PRESSURE_UNIT_FIELDS);
        let adsorption_unit = first_text(fields, &ADSORPTION_UNIT_FIELDS);
        let temperature = fields
            .get("temperature")
            .and_then(scalar_text)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let adsorbate_names = fields
            .get("adsorbates")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        item.get("name")
                            .and_then(scalar_text)
                            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();

        let raw_points = fields
            .get("isotherm_data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Some(Self {
            series_id: resolve_series_id(fields, index),
            pressure_unit,
            adsorption_unit,
            temperature,
            adsorbate_names,
            points: sorted_points(raw_points),
        })
    }

    /// Semicolon-joined adsorbate names, `N/A` when there are none.
    pub fn adsorbate_label(&self) -> String {
        if self.adsorbate_names.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            self.adsorbate_names.join(";")
        }
    }
}

/// Drops points missing either coordinate, then sorts by pressure. The sort is
/// stable so equal pressures keep their catalog order.
pub fn sorted_points(raw: &[Value]) -> Vec<Point> {
    let mut points: Vec<Point> = raw.iter().filter_map(Point::from_value).collect();
    points.sort_by(|a, b| a.pressure_value().total_cmp(&b.pressure_value()));
    points
}

fn first_text(fields: &Map<String, Value>, candidates: &[&str]) -> String {
    candidates
        .iter()
        .find_map(|key| fields.get(*key).and_then(scalar_text))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Display text for a scalar metadata value; null and containers yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(if *flag { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

/// Which collections a stage should work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionSelection {
    All,
    Indices(Vec<usize>),
}

impl CollectionSelection {
    /// Resolves the selection against a collection list. Out-of-range indices
    /// are dropped; duplicates keep their first position.
    pub fn resolve<'a>(&self, collections: &'a [Collection]) -> Vec<&'a Collection> {
        match self {
            CollectionSelection::All => collections.iter().collect(),
            CollectionSelection::Indices(indices) => {
                let mut seen = Vec::new();
                for &index in indices {
                    if index >= collections.len() {
                        tracing::warn!(index, "collection index out of range, skipping");
                        continue;
                    }
                    if !seen.contains(&index) {
                        seen.push(index);
                    }
                }
                seen.into_iter().map(|index| &collections[index]).collect()
            }
        }
    }
}

impl FromStr for CollectionSelection {
    type Err = MofError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(CollectionSelection::All);
        }
        let indices = trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<usize>()
                    .map_err(|_| MofError::InvalidSelection(value.to_string()))
            })
            .collect::<Result<Vec<_>, MofError>>()?;
        if indices.is_empty() {
            return Err(MofError::InvalidSelection(value.to_string()));
        }
        Ok(CollectionSelection::Indices(indices))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_name("CoREMOF 2019/v2");
        assert_eq!(once, "CoREMOF_2019_v2");
        assert_eq!(sanitize_name(&once), once);
    }

    #[test]
    fn record_id_priority() {
        let fields = object(json!({"name": "n", "id": 7, "mofkey": "", "mofid": null}));
        assert_eq!(resolve_record_id(&fields, "mof"), "7");

        let fields = object(json!({"mofkey": "K", "name": "n"}));
        assert_eq!(resolve_record_id(&fields, "mof"), "K");

        let fields = object(json!({"id": 0}));
        assert_eq!(resolve_record_id(&fields, "mof"), "mof");
    }

    #[test]
    fn series_id_falls_back_to_index() {
        let fields = object(json!({"DOI": "10.1/x"}));
        assert_eq!(resolve_series_id(&fields, 3), "10.1/x");
        assert_eq!(resolve_series_id(&Map::new(), 3), "3");
    }

    #[test]
    fn points_drop_incomplete_and_sort() {
        let raw = vec![
            json!({"pressure": 5, "total_adsorption": 2.0}),
            json!({"pressure": 1}),
            json!({"pressure": 0.5, "total_adsorption": 0.1}),
            json!({"total_adsorption": 3.0}),
            json!({"pressure": null, "total_adsorption": 1.0}),
        ];
        let points = sorted_points(&raw);
        let pressures: Vec<String> = points.iter().map(|p| p.pressure.to_string()).collect();
        assert_eq!(pressures, vec!["0.5", "5"]);
    }

    #[test]
    fn parse_selection() {
        assert_eq!("all".parse::<CollectionSelection>().unwrap(), CollectionSelection::All);
        assert_eq!(
            "0, 2".parse::<CollectionSelection>().unwrap(),
            CollectionSelection::Indices(vec![0, 2])
        );
        let err = "x,1".parse::<CollectionSelection>().unwrap_err();
        assert_matches!(err, MofError::InvalidSelection(_));
    }

    #[test]
    fn selection_skips_out_of_range() {
        let collections = vec![Collection::new("a", 1), Collection::new("b", 2)];
        let selection = CollectionSelection::Indices(vec![1, 9, 1]);
        let resolved = selection.resolve(&collections);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "b");
    }
}
