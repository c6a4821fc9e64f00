//! The import engine: runs parse results through reconciliation, field
//! creation, duplicate detection and batch writing, strictly in that order.

use std::sync::Arc;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ImportOptions,
    context::{ImportContext, StageError},
    dedupe,
    error::ImportError,
    parser::ParsedTable,
    reconcile::{self, ColumnDirectives, MappingTable},
    report::{ImportSummary, SkipReason, SkippedRow, SummaryBuilder},
    service::{RowStore, SchemaService},
    value::{CandidateRow, Record, coerce_value},
    writer::{self, WriteOutcome},
};

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub table_id: String,
    pub table: ParsedTable,
    pub directives: ColumnDirectives,
}

impl ImportRequest {
    pub fn new(table_id: impl Into<String>, table: ParsedTable) -> Self {
        Self {
            table_id: table_id.into(),
            table,
            directives: ColumnDirectives::default(),
        }
    }

    pub fn with_directives(mut self, directives: ColumnDirectives) -> Self {
        self.directives = directives;
        self
    }
}

/// How a run ended when it did not fail. A cancelled run still reports
/// what was committed before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Completed(ImportSummary),
    Cancelled(ImportSummary),
}

impl ImportOutcome {
    pub fn summary(&self) -> &ImportSummary {
        match self {
            ImportOutcome::Completed(summary) | ImportOutcome::Cancelled(summary) => summary,
        }
    }

    pub fn into_summary(self) -> ImportSummary {
        match self {
            ImportOutcome::Completed(summary) | ImportOutcome::Cancelled(summary) => summary,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportOutcome::Cancelled(_))
    }
}

pub struct ImportEngine {
    schema: Arc<dyn SchemaService>,
    store: Arc<dyn RowStore>,
    options: ImportOptions,
}

impl ImportEngine {
    pub fn new(
        schema: Arc<dyn SchemaService>,
        store: Arc<dyn RowStore>,
        options: ImportOptions,
    ) -> Self {
        Self {
            schema,
            store,
            options,
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub async fn run(
        &self,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> Result<ImportOutcome, ImportError> {
        let table = &request.table;
        let ctx = ImportContext::new(&request.table_id, &self.options, cancel);
        info!(
            "Importing {} row(s) across {} column(s) into table '{}'",
            table.row_count(),
            table.column_count(),
            ctx.table_id
        );
        if table.row_count() == 0 {
            return Err(ImportError::NoImportableRows {
                total: 0,
                skipped: 0,
            });
        }

        let identity_column = table.headers().first().cloned().unwrap_or_default();
        let mut builder = SummaryBuilder::new(table.row_count(), identity_column);
        let outcome = match self.stages(&ctx, request, &mut builder).await {
            Ok(outcome) => outcome,
            Err(StageError::Cancelled) => {
                info!("Import cancelled before any rows were written");
                return Ok(ImportOutcome::Cancelled(builder.finish(0)));
            }
            Err(StageError::Fatal(err)) => {
                return Err(with_added_fields(ctx.table_id, err, builder.added_fields()));
            }
        };

        let added = builder.added_fields();
        let summary = builder.finish(outcome.progress.imported_rows);
        match outcome.stop {
            None => {
                info!(
                    "Import finished: {} imported, {} skipped",
                    summary.imported_rows, summary.skipped_rows
                );
                Ok(ImportOutcome::Completed(summary))
            }
            Some(StageError::Cancelled) => Ok(ImportOutcome::Cancelled(summary)),
            Some(StageError::Fatal(err)) => Err(with_added_fields(ctx.table_id, err, added)),
        }
    }

    async fn stages(
        &self,
        ctx: &ImportContext<'_>,
        request: &ImportRequest,
        builder: &mut SummaryBuilder,
    ) -> Result<WriteOutcome, StageError> {
        let table = &request.table;
        let schema = self.schema.as_ref();
        let store = self.store.as_ref();

        let existing = reconcile::list_fields(ctx, schema).await?;
        let mut mappings = reconcile::plan_mappings(ctx, table, &existing, &request.directives)?;
        reconcile::attach_choices(&mut mappings, table, ctx.options.choice_limit);
        reconcile::attach_links(&mut mappings, &request.directives);
        reconcile::validate_plans(&mappings)?;

        ctx.checkpoint()?;
        let mut materialized = Vec::new();
        let created = reconcile::materialize(ctx, schema, &mut mappings, &mut materialized).await;
        builder.fields(&materialized);
        created?;
        let snapshot = reconcile::await_visibility(ctx, schema, &materialized).await?;

        let key_field = mappings
            .identity()
            .and_then(|entry| entry.mapping.field_name())
            .map(str::to_string)
            .ok_or_else(|| ImportError::IdentityColumnUnmapped {
                column: table.headers().first().cloned().unwrap_or_default(),
            })?;
        builder.primary_key_field(&key_field);

        let (candidates, unmapped) = build_candidates(table, &mappings);
        let mut skipped = unmapped.len();
        builder.skipped(unmapped);

        ctx.checkpoint()?;
        let partition = dedupe::detect(ctx, store, candidates, &key_field).await?;
        skipped += partition.skipped.len();
        builder.skipped(partition.skipped);
        if partition.importable.is_empty() {
            return Err(ImportError::NoImportableRows {
                total: table.row_count(),
                skipped,
            }
            .into());
        }

        let rows = partition
            .importable
            .into_iter()
            .map(|candidate| candidate.values)
            .collect::<Vec<Record>>();
        let known_fields = snapshot
            .into_iter()
            .map(|field| field.name)
            .collect::<Vec<_>>();
        Ok(writer::write_batches(ctx, store, &rows, &known_fields).await)
    }
}

fn with_added_fields(table_id: &str, err: ImportError, created: Vec<String>) -> ImportError {
    if created.is_empty() {
        return err;
    }
    warn!(
        "Import into '{table_id}' failed after adding {} field(s); they remain in the table",
        created.len()
    );
    ImportError::AfterFieldsCreated {
        table: table_id.to_string(),
        created,
        error: Box::new(err),
    }
}

pub fn build_candidates(
    table: &ParsedTable,
    mappings: &MappingTable,
) -> (Vec<CandidateRow>, Vec<SkippedRow>) {
    let mut candidates = Vec::with_capacity(table.row_count());
    let mut skipped = Vec::new();
    for (position, row) in table.rows().iter().enumerate() {
        let values = mappings
            .mapped_fields()
            .filter_map(|(column, field)| {
                let raw = row.get(column).and_then(|cell| cell.as_deref());
                let value = coerce_value(raw, field.kind);
                (!value.is_null()).then(|| (field.name.clone(), value))
            })
            .collect::<Record>();
        let candidate = CandidateRow {
            source_index: table.source_index(position),
            values,
        };
        if candidate.values.is_empty() {
            skipped.push(SkippedRow {
                row: candidate.row_number(),
                reason: SkipReason::NoMappedValues,
                value: None,
            });
        } else {
            candidates.push(candidate);
        }
    }
    (candidates, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ImportOptions,
        parser::parse_text,
        reconcile::{ColumnDirectives, plan_mappings},
        schema::{FieldKind, SchemaField},
        value::CellValue,
    };

    #[test]
    fn candidates_carry_coerced_values_for_mapped_columns_only() {
        let table = parse_text(
            "Name,Amount,Notes\nWidget,\"$1,250.50\",x\n,,only notes\n",
            b',',
        )
        .unwrap();
        let existing = vec![
            SchemaField::new("name", FieldKind::Text),
            SchemaField::new("amount", FieldKind::Currency),
        ];
        let options = ImportOptions::default();
        let cancel = CancellationToken::new();
        let ctx = ImportContext::new("t", &options, &cancel);
        let mappings = plan_mappings(
            &ctx,
            &table,
            &existing,
            &ColumnDirectives::new().skip("Notes"),
        )
        .unwrap();

        let (candidates, skipped) = build_candidates(&table, &mappings);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].value("amount"),
            Some(&CellValue::Number(1250.5))
        );
        assert_eq!(candidates[0].values.len(), 2);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].row, 2);
        assert_eq!(skipped[0].reason, SkipReason::NoMappedValues);
    }
}
