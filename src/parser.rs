//! Tabular parser: delimited text into headers and rows of raw cells.
//!
//! The parser does no typing. Cells are kept as trimmed-on-demand strings,
//! blank cells become `None`, and every row is padded or truncated to the
//! header width so column access never has to bounds-check.

use std::{io::Read, path::Path};

use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{error::ImportError, io_utils, schema::column_key};

pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    headers: Vec<String>,
    rows: Vec<RawRow>,
    // Zero-based position of each kept row among all data rows, blank ones
    // included.
    origins: Vec<usize>,
}

impl ParsedTable {
    pub fn new(headers: Vec<String>, rows: Vec<RawRow>) -> Result<Self, ImportError> {
        let headers = normalize_headers(headers);
        if headers.is_empty() {
            return Err(ImportError::EmptySource);
        }
        let width = headers.len();
        let (origins, rows): (Vec<usize>, Vec<RawRow>) = rows
            .into_iter()
            .map(|row| fit_row(row, width))
            .enumerate()
            .filter(|(_, row)| row.iter().any(Option::is_some))
            .unzip();
        Ok(Self {
            headers,
            rows,
            origins,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn source_index(&self, row: usize) -> usize {
        self.origins.get(row).copied().unwrap_or(row)
    }

    pub fn column(&self, index: usize) -> Option<ColumnRef<'_>> {
        self.headers.get(index).map(|name| ColumnRef {
            index,
            name,
            rows: &self.rows,
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = ColumnRef<'_>> {
        (0..self.headers.len()).filter_map(|idx| self.column(idx))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        let wanted = column_key(name);
        self.headers
            .iter()
            .position(|header| column_key(header) == wanted)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    pub index: usize,
    pub name: &'a str,
    rows: &'a [RawRow],
}

impl<'a> ColumnRef<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize) -> Option<&'a str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(self.index))
            .and_then(|cell| cell.as_deref())
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let index = self.index;
        self.rows
            .iter()
            .map(move |cells| cells.get(index).and_then(|cell| cell.as_deref()))
    }
}

pub fn parse_text(text: &str, delimiter: u8) -> Result<ParsedTable, ImportError> {
    parse_reader(text.as_bytes(), delimiter, UTF_8)
}

pub fn parse_path(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<ParsedTable, ImportError> {
    let input = io_utils::open_input(path).map_err(source_error)?;
    parse_reader(input, delimiter, encoding)
}

pub fn parse_reader<R>(
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<ParsedTable, ImportError>
where
    R: Read,
{
    let mut reader = io_utils::open_csv_reader(reader, delimiter);
    let headers = io_utils::reader_headers(&mut reader, encoding).map_err(source_error)?;

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|err| source_error(err.into()))?
    {
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let decoded = io_utils::decode_record(&record, encoding)
            .map_err(|err| source_error(err.context(format!("Decoding line {line}"))))?;
        rows.push(
            decoded
                .into_iter()
                .map(|cell| {
                    if cell.trim().is_empty() {
                        None
                    } else {
                        Some(cell)
                    }
                })
                .collect(),
        );
    }

    let table = ParsedTable::new(headers, rows)?;
    debug!(
        "Parsed {} column(s) and {} row(s)",
        table.column_count(),
        table.row_count()
    );
    Ok(table)
}

fn source_error(err: anyhow::Error) -> ImportError {
    ImportError::Source {
        detail: format!("{err:#}"),
    }
}

fn fit_row(mut row: RawRow, width: usize) -> RawRow {
    row.resize(width, None);
    row
}

fn normalize_headers(headers: Vec<String>) -> Vec<String> {
    if headers
        .iter()
        .all(|h| column_key(h).is_empty())
    {
        return Vec::new();
    }
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for (idx, header) in headers.into_iter().enumerate() {
        let mut name = column_key(&header).into_owned();
        if name.is_empty() {
            name = format!("Column {}", idx + 1);
        }
        if seen.iter().any(|existing| existing.eq_ignore_ascii_case(&name)) {
            let base = name.clone();
            let mut suffix = 2usize;
            while seen
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&name))
            {
                name = format!("{base} {suffix}");
                suffix += 1;
            }
        }
        seen.push(name);
    }
    seen
}
