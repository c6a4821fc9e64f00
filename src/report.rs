//! Import summary: what was written, what was skipped and why, and which
//! fields the import created.

use std::fmt;

use serde::Serialize;

use crate::{
    reconcile::{FieldOutcome, MaterializedField},
    schema::FieldKind,
    table::TextTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EmptyKey,
    DuplicateOfExisting,
    DuplicateInFile,
    NoMappedValues,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EmptyKey => "empty or missing key",
            SkipReason::DuplicateOfExisting => "duplicate of an existing record",
            SkipReason::DuplicateInFile => "duplicate of an earlier row in the file",
            SkipReason::NoMappedValues => "no values in mapped columns",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    /// 1-based data row number.
    pub row: usize,
    pub reason: SkipReason,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReport {
    pub column: String,
    pub field: String,
    pub kind: FieldKind,
    pub outcome: FieldOutcome,
}

impl From<&MaterializedField> for FieldReport {
    fn from(materialized: &MaterializedField) -> Self {
        Self {
            column: materialized.column.clone(),
            field: materialized.field.name.clone(),
            kind: materialized.field.kind,
            outcome: materialized.outcome,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_source_rows: usize,
    pub imported_rows: usize,
    pub skipped_rows: usize,
    pub primary_key_field: String,
    pub skipped_details: Vec<SkippedRow>,
    pub created_fields: Vec<FieldReport>,
}

impl ImportSummary {
    pub fn pending_rows(&self) -> usize {
        self.total_source_rows
            .saturating_sub(self.imported_rows + self.skipped_rows)
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "Imported {} of {} row(s) keyed on '{}'; skipped {}.\n",
            self.imported_rows, self.total_source_rows, self.primary_key_field, self.skipped_rows
        );
        if !self.created_fields.is_empty() {
            let mut table = TextTable::new(["column", "field", "kind", "outcome"]);
            for field in &self.created_fields {
                table.push_row([
                    field.column.clone(),
                    field.field.clone(),
                    field.kind.to_string(),
                    field.outcome.as_str().to_string(),
                ]);
            }
            out.push('\n');
            out.push_str(&table.render());
        }
        if !self.skipped_details.is_empty() {
            let mut table = TextTable::new(["row", "reason", "value"]);
            for skipped in &self.skipped_details {
                table.push_row([
                    skipped.row.to_string(),
                    skipped.reason.to_string(),
                    skipped.value.clone().unwrap_or_default(),
                ]);
            }
            out.push('\n');
            out.push_str(&table.render());
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct SummaryBuilder {
    summary: ImportSummary,
}

impl SummaryBuilder {
    pub fn new(total_source_rows: usize, primary_key_field: impl Into<String>) -> Self {
        Self {
            summary: ImportSummary {
                total_source_rows,
                primary_key_field: primary_key_field.into(),
                ..ImportSummary::default()
            },
        }
    }

    pub fn primary_key_field(&mut self, field: &str) -> &mut Self {
        self.summary.primary_key_field = field.to_string();
        self
    }

    pub fn fields(&mut self, materialized: &[MaterializedField]) -> &mut Self {
        self.summary
            .created_fields
            .extend(materialized.iter().map(FieldReport::from));
        self
    }

    pub fn added_fields(&self) -> Vec<String> {
        self.summary
            .created_fields
            .iter()
            .filter(|report| report.outcome != FieldOutcome::AlreadyExisted)
            .map(|report| report.field.clone())
            .collect()
    }

    pub fn skipped<I>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = SkippedRow>,
    {
        self.summary.skipped_details.extend(rows);
        self
    }

    pub fn finish(mut self, imported_rows: usize) -> ImportSummary {
        self.summary.skipped_details.sort_by_key(|skipped| skipped.row);
        self.summary.skipped_rows = self.summary.skipped_details.len();
        self.summary.imported_rows = imported_rows;
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(row: usize, reason: SkipReason) -> SkippedRow {
        SkippedRow {
            row,
            reason,
            value: None,
        }
    }

    #[test]
    fn builder_orders_skips_and_counts_them() {
        let mut builder = SummaryBuilder::new(10, "title");
        builder
            .skipped([skipped(7, SkipReason::DuplicateOfExisting)])
            .skipped([skipped(2, SkipReason::EmptyKey)]);
        let summary = builder.finish(6);
        assert_eq!(summary.skipped_rows, 2);
        assert_eq!(summary.skipped_details[0].row, 2);
        assert_eq!(summary.imported_rows, 6);
        assert_eq!(summary.pending_rows(), 2);
    }

    #[test]
    fn render_lists_skipped_rows_with_reasons() {
        let mut builder = SummaryBuilder::new(3, "email");
        builder.skipped([SkippedRow {
            row: 3,
            reason: SkipReason::DuplicateOfExisting,
            value: Some("a@example.com".to_string()),
        }]);
        let rendered = builder.finish(2).render();
        assert!(rendered.starts_with("Imported 2 of 3 row(s) keyed on 'email'; skipped 1."));
        assert!(rendered.contains("duplicate of an existing record"));
        assert!(rendered.contains("a@example.com"));
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = SummaryBuilder::new(1, "id_code").finish(1);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalSourceRows"], 1);
        assert_eq!(json["primaryKeyField"], "id_code");
    }
}
