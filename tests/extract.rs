use std::fs;
use std::path::Path;

use serde_json::{Value, json};

use mof_harvester::extract::{extract_from_document, process_collection};
use mof_harvester::pool::WorkerPool;

fn write_document(dir: &Path, name: &str, value: &Value) -> std::path::PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

fn table_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn demo_document_yields_sorted_table() {
    let temp = tempfile::tempdir().unwrap();
    let doc = write_document(
        &temp.path().join("json"),
        "Demo_X1.json",
        &json!({
            "mofid": "X1",
            "surface_area_m2g": 12.5,
            "isotherms": [{
                "pressure_unit": "bar",
                "adsorption_unit": "mmol/g",
                "temperature": 298,
                "isotherm_data": [
                    {"pressure": 2, "total_adsorption": 1.1},
                    {"pressure": 1, "total_adsorption": 0.5}
                ]
            }]
        }),
    );
    let out = temp.path().join("csv");

    assert_eq!(extract_from_document(&doc, "Demo", &out), 1);

    let content = fs::read_to_string(out.join("Demo").join("Demo_X1_0.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "MOF_ID,X1");
    assert_eq!(lines[1], "Database,Demo");
    assert_eq!(lines[2], "Surface_area_m2g,12.5");
    assert_eq!(lines[3], "Surface_area_m2cm3,0.0");
    assert_eq!(lines[4], "Adsorbate,N/A");
    assert_eq!(lines[5], "Temperature,298");
    assert_eq!(lines[6], "");
    assert_eq!(lines[7], "Pressure (bar),Adsorption (mmol/g)");
    assert_eq!(&lines[8..], &["1,0.5", "2,1.1"]);
}

#[test]
fn absent_or_empty_isotherms_write_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let json_dir = temp.path().join("json");
    let out = temp.path().join("csv");
    for (index, doc) in [
        json!({"mofid": "A"}),
        json!({"mofid": "B", "isotherms": []}),
        json!({"mofid": "C", "isotherms": null}),
    ]
    .iter()
    .enumerate()
    {
        let path = write_document(&json_dir, &format!("doc{index}.json"), doc);
        assert_eq!(extract_from_document(&path, "Demo", &out), 0);
    }
    assert!(table_files(&out.join("Demo")).is_empty());
}

#[test]
fn single_object_and_series_ids() {
    let temp = tempfile::tempdir().unwrap();
    let json_dir = temp.path().join("json");
    let out = temp.path().join("csv");

    let single = write_document(
        &json_dir,
        "single.json",
        &json!({
            "mofkey": "K 1",
            "isotherms": {"id": 44, "pressureUnits": "Pa", "isotherm_data": []}
        }),
    );
    assert_eq!(extract_from_document(&single, "My DB", &out), 1);

    let many = write_document(
        &json_dir,
        "many.json",
        &json!({
            "mofid": "M",
            "isotherms": [
                {"DOI": "10.1021/ja1"},
                {},
                "not an object",
                {"id": "x"}
            ]
        }),
    );
    assert_eq!(extract_from_document(&many, "My DB", &out), 3);

    assert_eq!(
        table_files(&out.join("My_DB")),
        vec![
            "My_DB_K_1_44.csv",
            "My_DB_M_1.csv",
            "My_DB_M_10.1021_ja1.csv",
            "My_DB_M_x.csv",
        ]
    );
    let content = fs::read_to_string(out.join("My_DB").join("My_DB_K_1_44.csv")).unwrap();
    assert!(content.contains("Pressure (Pa),Adsorption (N/A)\n"));
    assert!(content.starts_with("MOF_ID,K_1\nDatabase,My DB\n"));
}

#[test]
fn points_missing_a_coordinate_are_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let doc = write_document(
        &temp.path().join("json"),
        "d.json",
        &json!({
            "mofid": "P",
            "isotherms": [{
                "adsorbates": [{"name": "CO2"}, {"formula": "N2"}],
                "isotherm_data": [
                    {"pressure": 3.5, "total_adsorption": 2},
                    {"pressure": 0.1},
                    {"total_adsorption": 9},
                    {"pressure": 0.2, "total_adsorption": 0.4},
                    {"pressure": 3.5, "total_adsorption": 2.5}
                ]
            }]
        }),
    );
    let out = temp.path().join("csv");
    assert_eq!(extract_from_document(&doc, "Demo", &out), 1);

    let content = fs::read_to_string(out.join("Demo").join("Demo_P_0.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[4], "Adsorbate,CO2;N/A");
    assert_eq!(lines[5], "Temperature,N/A");
    assert_eq!(&lines[8..], &["0.2,0.4", "3.5,2", "3.5,2.5"]);
}

#[test]
fn unreadable_documents_yield_zero() {
    let temp = tempfile::tempdir().unwrap();
    let out = temp.path().join("csv");
    assert_eq!(
        extract_from_document(&temp.path().join("missing.json"), "Demo", &out),
        0
    );
    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{\"mofid\": ").unwrap();
    assert_eq!(extract_from_document(&broken, "Demo", &out), 0);
}

#[test]
fn process_collection_sums_documents() {
    let temp = tempfile::tempdir().unwrap();
    let json_root = temp.path().join("JSON");
    let out = temp.path().join("MOF_ISO");
    let dir = json_root.join("Core_MOF");
    let series = json!({"isotherm_data": [{"pressure": 1, "total_adsorption": 1}]});
    write_document(&dir, "a.json", &json!({"mofid": "a", "isotherms": [series, series]}));
    write_document(&dir, "b.json", &json!({"mofid": "b", "isotherms": series}));
    write_document(&dir, "c.json", &json!({"mofid": "c"}));
    fs::write(dir.join("broken.json"), "nope").unwrap();
    fs::write(dir.join("notes.txt"), "ignored").unwrap();

    assert_eq!(process_collection("Core MOF", &json_root, &out, &WorkerPool::new(3)), 3);
    assert_eq!(
        table_files(&out.join("Core_MOF")),
        vec!["Core_MOF_a_0.csv", "Core_MOF_a_1.csv", "Core_MOF_b_0.csv"]
    );
}

#[test]
fn process_collection_without_documents_is_zero_work() {
    let temp = tempfile::tempdir().unwrap();
    let json_root = temp.path().join("JSON");
    let out = temp.path().join("MOF_ISO");
    assert_eq!(process_collection("Demo", &json_root, &out, &WorkerPool::new(2)), 0);

    fs::create_dir_all(json_root.join("Demo")).unwrap();
    assert_eq!(process_collection("Demo", &json_root, &out, &WorkerPool::new(2)), 0);
}

#[test]
fn one_failing_series_keeps_siblings() {
    let temp = tempfile::tempdir().unwrap();
    let json_root = temp.path().join("JSON");
    let out = temp.path().join("MOF_ISO");
    let dir = json_root.join("Demo");
    let series = json!({"isotherm_data": [{"pressure": 1, "total_adsorption": 1}]});
    let doc = write_document(
        &dir,
        "s.json",
        &json!({"mofid": "S", "isotherms": [series, series, series]}),
    );
    write_document(&dir, "t.json", &json!({"mofid": "T", "isotherms": [series]}));
    // A directory squatting on the middle table path makes that single write fail.
    fs::create_dir_all(out.join("Demo").join("Demo_S_1.csv")).unwrap();

    assert_eq!(extract_from_document(&doc, "Demo", &out), 2);
    assert!(out.join("Demo").join("Demo_S_0.csv").is_file());
    assert!(out.join("Demo").join("Demo_S_2.csv").is_file());

    assert_eq!(process_collection("Demo", &json_root, &out, &WorkerPool::new(2)), 3);
    assert!(out.join("Demo").join("Demo_T_0.csv").is_file());
}
