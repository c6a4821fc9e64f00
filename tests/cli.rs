mod common;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;

use common::{TestWorkspace, fixture_path};
use sheet_import::{memory::TableSnapshot, schema::FieldKind};

fn sheet_import() -> Command {
    Command::cargo_bin("sheet-import").expect("binary exists")
}

fn summary_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("summary is valid JSON")
}

#[test]
fn infer_reports_kind_per_column() {
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args(["infer", "-i", csv.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("singleChoice"))
        .stdout(contains("currency"))
        .stdout(contains("date"))
        .stdout(contains("email"));
}

#[test]
fn infer_reads_tsv_by_extension() {
    let tsv = fixture_path("tags.tsv");
    sheet_import()
        .args(["infer", "-i", tsv.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("multiChoice"))
        .stdout(contains("percent"));
}

#[test]
fn import_creates_missing_table_snapshot() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    let csv = fixture_path("tasks.csv");

    let assert = sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
            "--table-id",
            "tbl_tasks",
            "--json",
        ])
        .assert()
        .success();
    let summary = summary_json(&assert.get_output().stdout);
    assert_eq!(summary["importedRows"], 4);
    assert_eq!(summary["primaryKeyField"], "name");
    assert_eq!(summary["createdFields"].as_array().unwrap().len(), 5);

    let snapshot = TableSnapshot::load(&table).expect("snapshot saved");
    assert_eq!(snapshot.table_id, "tbl_tasks");
    assert_eq!(snapshot.records.len(), 4);
    assert_eq!(snapshot.fields[2].kind, FieldKind::Currency);

    sheet_import()
        .args(["fields", "-t", table.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Table 'tbl_tasks': 5 field(s), 4 record(s)"))
        .stdout(contains("Closed, Open"));
}

#[test]
fn import_skips_rows_already_in_the_table() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    fs::copy(fixture_path("tasks_table.json"), &table).expect("copy fixture");
    let csv = fixture_path("tasks.csv");

    sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Imported 3 of 4 row(s) keyed on 'name'; skipped 1."))
        .stdout(contains("duplicate of an existing record"));

    let snapshot = TableSnapshot::load(&table).unwrap();
    assert_eq!(snapshot.records.len(), 4);
    assert_eq!(snapshot.fields.len(), 5);
}

#[test]
fn reimporting_the_same_file_has_nothing_left_to_import() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    let csv = fixture_path("tasks.csv");
    let args = [
        "import",
        "-i",
        csv.to_str().unwrap(),
        "-t",
        table.to_str().unwrap(),
        "--table-id",
        "tbl_tasks",
    ];

    sheet_import().args(args).assert().success();
    sheet_import()
        .args(args)
        .assert()
        .failure()
        .stderr(contains("No rows to import: 4 of 4 row(s) were skipped"));
}

#[test]
fn overrides_are_applied_from_the_command_line() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    let csv = fixture_path("tasks.csv");

    let assert = sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
            "--table-id",
            "tbl_tasks",
            "--skip",
            "Email",
            "--kind",
            "Status=text",
            "--batch-size",
            "2",
            "--json",
        ])
        .assert()
        .success();
    let summary = summary_json(&assert.get_output().stdout);
    assert_eq!(summary["importedRows"], 4);

    let snapshot = TableSnapshot::load(&table).unwrap();
    let names = snapshot
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["name", "status", "amount", "due"]);
    assert_eq!(snapshot.fields[1].kind, FieldKind::Text);
}

#[test]
fn missing_snapshot_requires_a_table_id() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("absent.json");
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("--table-id"));
    assert!(!table.exists());
}

#[test]
fn table_id_must_match_an_existing_snapshot() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    fs::copy(fixture_path("tasks_table.json"), &table).expect("copy fixture");
    let before = fs::read_to_string(&table).unwrap();
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
            "--table-id",
            "tbl_other",
        ])
        .assert()
        .failure()
        .stderr(contains("--table-id 'tbl_other' does not match table 'tbl_tasks'"));
    assert_eq!(fs::read_to_string(&table).unwrap(), before);
}

#[test]
fn unknown_kind_names_are_rejected() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
            "--table-id",
            "tbl_tasks",
            "--kind",
            "Status=colour",
        ])
        .assert()
        .failure()
        .stderr(contains("Parsing kind for column 'Status'"));
}

#[test]
fn mapping_to_an_absent_field_lists_available_fields() {
    let ws = TestWorkspace::new();
    let table = ws.path().join("table.json");
    fs::copy(fixture_path("tasks_table.json"), &table).expect("copy fixture");
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args([
            "import",
            "-i",
            csv.to_str().unwrap(),
            "-t",
            table.to_str().unwrap(),
            "--map",
            "Email=contact",
        ])
        .assert()
        .failure()
        .stderr(contains("Available fields: name, status"));
}

#[test]
fn config_file_values_are_validated() {
    let ws = TestWorkspace::new();
    let config = ws.write("import.yml", "batch_size: 0\n");
    let csv = fixture_path("tasks.csv");
    sheet_import()
        .args([
            "infer",
            "-i",
            csv.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("batch_size must be positive"));
}
