#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

use sheet_import::{
    config::ImportOptions,
    error::ImportError,
    memory::InMemoryTable,
    parser::parse_text,
    pipeline::{ImportEngine, ImportOutcome, ImportRequest},
    reconcile::ColumnDirectives,
    retry::RetryPolicy,
    value::CellValue,
};

pub const TABLE_ID: &str = "tbl_tasks";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Default options without any waiting between retries.
pub fn fast_options() -> ImportOptions {
    ImportOptions {
        creation_retry: RetryPolicy::immediate(2),
        visibility_retry: RetryPolicy::immediate(10),
        ..ImportOptions::default()
    }
}

pub fn engine(backend: &Arc<InMemoryTable>, options: ImportOptions) -> ImportEngine {
    ImportEngine::new(backend.clone(), backend.clone(), options)
}

pub fn request(csv: &str, directives: ColumnDirectives) -> ImportRequest {
    let table = parse_text(csv, b',').expect("parse csv fixture");
    ImportRequest::new(TABLE_ID, table).with_directives(directives)
}

pub async fn import(
    backend: &Arc<InMemoryTable>,
    options: ImportOptions,
    csv: &str,
    directives: ColumnDirectives,
) -> Result<ImportOutcome, ImportError> {
    engine(backend, options)
        .run(&request(csv, directives), &CancellationToken::new())
        .await
}

pub fn text(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

/// `rows` data rows keyed `key-0`, `key-1`, ...
pub fn numbered_csv(rows: usize) -> String {
    let mut csv = String::from("Key,Note\n");
    for row in 0..rows {
        csv.push_str(&format!("key-{row},note {row}\n"));
    }
    csv
}
