//! Schema reconciliation: maps every source column to an existing field, a
//! field to create, or nothing, and then creates the missing fields.
//!
//! Planning ([`plan_mappings`], [`attach_choices`], [`attach_links`],
//! [`validate_plans`]) is pure and runs against one schema snapshot.
//! [`materialize`] then submits each planned field on its own; it is not
//! transactional across fields. Each submission runs a small state machine:
//!
//! ```text
//! PreCheck --exists--> Done(AlreadyExisted)
//!    |
//!    v
//! Submit --ok--> Done(Created)
//!    |  \--conflict on last attempt--> FieldConflict
//!    v
//! Resolve --exists--> Done(ResolvedAfterConflict)
//!    \--missing--> Submit (next attempt)
//! ```
//!
//! [`await_visibility`] finally polls the schema until every created field
//! shows up, since schema reads may lag behind writes.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    choices::extract_choices,
    context::{ImportContext, StageError},
    error::ImportError,
    infer::{infer_with, sample_column},
    parser::ParsedTable,
    schema::{
        FieldDraft, FieldKind, FieldOptions, SchemaField, column_key, names_match,
        sanitize_field_name, unique_field_name,
    },
    service::{CreateFieldError, SchemaService},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnOverride {
    Skip,
    Existing(String),
    Create,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDirectives {
    overrides: BTreeMap<String, ColumnOverride>,
    kinds: BTreeMap<String, FieldKind>,
    links: BTreeMap<String, String>,
}

impl ColumnDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, column: impl Into<String>) -> Self {
        self.overrides.insert(column.into(), ColumnOverride::Skip);
        self
    }

    pub fn map_to(mut self, column: impl Into<String>, field: impl Into<String>) -> Self {
        self.overrides
            .insert(column.into(), ColumnOverride::Existing(field.into()));
        self
    }

    pub fn create(mut self, column: impl Into<String>) -> Self {
        self.overrides.insert(column.into(), ColumnOverride::Create);
        self
    }

    pub fn kind(mut self, column: impl Into<String>, kind: FieldKind) -> Self {
        self.kinds.insert(column.into(), kind);
        self
    }

    pub fn link(mut self, column: impl Into<String>, table_id: impl Into<String>) -> Self {
        self.links.insert(column.into(), table_id.into());
        self
    }

    pub fn override_for(&self, column: &str) -> Option<&ColumnOverride> {
        lookup_by_column(&self.overrides, column)
    }

    pub fn kind_for(&self, column: &str) -> Option<FieldKind> {
        lookup_by_column(&self.kinds, column).copied()
    }

    pub fn link_for(&self, column: &str) -> Option<&str> {
        lookup_by_column(&self.links, column).map(String::as_str)
    }
}

fn lookup_by_column<'m, V>(map: &'m BTreeMap<String, V>, column: &str) -> Option<&'m V> {
    let wanted = column_key(column);
    map.iter()
        .find(|(key, _)| column_key(key) == wanted)
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMapping {
    Mapped(SchemaField),
    ToCreate(FieldDraft),
    Skipped,
}

impl ColumnMapping {
    pub fn field_name(&self) -> Option<&str> {
        match self {
            ColumnMapping::Mapped(field) => Some(&field.name),
            ColumnMapping::ToCreate(draft) => Some(&draft.name),
            ColumnMapping::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ColumnMapping::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub column_index: usize,
    pub column: String,
    pub mapping: ColumnMapping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
}

impl MappingTable {
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn entry(&self, column_index: usize) -> Option<&MappingEntry> {
        self.entries.get(column_index)
    }

    pub fn identity(&self) -> Option<&MappingEntry> {
        self.entries.first()
    }

    pub fn mapped_fields(&self) -> impl Iterator<Item = (usize, &SchemaField)> {
        self.entries.iter().filter_map(|entry| match &entry.mapping {
            ColumnMapping::Mapped(field) => Some((entry.column_index, field)),
            _ => None,
        })
    }

    pub fn drafts(&self) -> impl Iterator<Item = (&str, &FieldDraft)> {
        self.entries.iter().filter_map(|entry| match &entry.mapping {
            ColumnMapping::ToCreate(draft) => Some((entry.column.as_str(), draft)),
            _ => None,
        })
    }

    fn drafts_mut(&mut self) -> impl Iterator<Item = (usize, &str, &mut FieldDraft)> {
        self.entries.iter_mut().filter_map(|entry| match &mut entry.mapping {
            ColumnMapping::ToCreate(draft) => {
                Some((entry.column_index, entry.column.as_str(), draft))
            }
            _ => None,
        })
    }
}

/// Create calls per field: the first submission and one more after a
/// conflict has been re-read. `creation_retry` only sets the delay.
pub const CREATION_SUBMISSIONS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOutcome {
    Created,
    AlreadyExisted,
    ResolvedAfterConflict,
}

impl FieldOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOutcome::Created => "created",
            FieldOutcome::AlreadyExisted => "already existed",
            FieldOutcome::ResolvedAfterConflict => "resolved after conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedField {
    pub column: String,
    pub field: SchemaField,
    pub outcome: FieldOutcome,
    pub submissions: u32,
}

pub fn plan_mappings(
    ctx: &ImportContext<'_>,
    table: &ParsedTable,
    existing: &[SchemaField],
    directives: &ColumnDirectives,
) -> Result<MappingTable, ImportError> {
    let settings = ctx.inference_settings();
    let mut claimed: Vec<String> = Vec::new();
    let mut entries = Vec::with_capacity(table.column_count());

    for column in table.columns() {
        let matched = match directives.override_for(column.name) {
            Some(ColumnOverride::Skip) => {
                debug!("Column '{}' skipped by user override", column.name);
                None
            }
            Some(ColumnOverride::Existing(target)) => {
                let field = find_field(existing, target).ok_or_else(|| {
                    ImportError::UnknownTargetField {
                        column: column.name.to_string(),
                        field: target.clone(),
                        table: ctx.table_id.to_string(),
                        available: existing.iter().map(|f| f.name.clone()).collect(),
                    }
                })?;
                Some(Ok(field))
            }
            Some(ColumnOverride::Create) => Some(Err(())),
            None => Some(find_field(existing, column.name).ok_or(())),
        };

        let mapping = match matched {
            None => ColumnMapping::Skipped,
            Some(Ok(field)) => {
                if field.kind == FieldKind::Lookup {
                    warn!(
                        "Column '{}' matches lookup field '{}', which cannot be written; skipping",
                        column.name, field.name
                    );
                    ColumnMapping::Skipped
                } else if claimed.iter().any(|name| name == &field.name) {
                    warn!(
                        "Column '{}' matches field '{}', which an earlier column already maps to; skipping",
                        column.name, field.name
                    );
                    ColumnMapping::Skipped
                } else {
                    if let Some(kind) = directives.kind_for(column.name)
                        && kind != field.kind
                    {
                        debug!(
                            "Ignoring kind override '{kind}' for column '{}': existing field '{}' is '{}'",
                            column.name, field.name, field.kind
                        );
                    }
                    claimed.push(field.name.clone());
                    ColumnMapping::Mapped(field.clone())
                }
            }
            Some(Err(())) => {
                let kind = directives.kind_for(column.name).unwrap_or_else(|| {
                    let samples =
                        sample_column(&column, ctx.options.sample_size, ctx.options.head_backfill);
                    infer_with(&samples, &settings)
                });
                let name = unique_field_name(&sanitize_field_name(column.name), |candidate| {
                    existing.iter().any(|f| names_match(candidate, &f.name))
                        || claimed.iter().any(|name| name == candidate)
                });
                debug!(
                    "Column '{}' will create field '{name}' of kind '{kind}'",
                    column.name
                );
                claimed.push(name.clone());
                ColumnMapping::ToCreate(FieldDraft::new(name, kind))
            }
        };

        entries.push(MappingEntry {
            column_index: column.index,
            column: column.name.to_string(),
            mapping,
        });
    }

    let table = MappingTable { entries };
    info!(
        "Planned {} column mapping(s): {} existing, {} new, {} skipped",
        table.entries.len(),
        table.mapped_fields().count(),
        table.drafts().count(),
        table
            .entries
            .iter()
            .filter(|e| e.mapping.is_skipped())
            .count()
    );
    Ok(table)
}

pub fn attach_choices(mappings: &mut MappingTable, table: &ParsedTable, limit: usize) {
    for (column_index, column, draft) in mappings.drafts_mut() {
        if !draft.kind.is_choice() {
            continue;
        }
        let Some(source) = table.column(column_index) else {
            continue;
        };
        let choices = extract_choices(source.values(), draft.kind, limit);
        debug!(
            "Column '{column}' yields {} choice(s) for field '{}'",
            choices.len(),
            draft.name
        );
        draft.options = FieldOptions::Choices { choices };
    }
}

pub fn attach_links(mappings: &mut MappingTable, directives: &ColumnDirectives) {
    for (_, column, draft) in mappings.drafts_mut() {
        if draft.kind != FieldKind::LinkToTable {
            continue;
        }
        if let Some(table_id) = directives.link_for(column) {
            draft.options = FieldOptions::Link {
                linked_table_id: table_id.to_string(),
            };
        }
    }
}

pub fn validate_plans(mappings: &MappingTable) -> Result<(), ImportError> {
    if let Some(identity) = mappings.identity()
        && identity.mapping.is_skipped()
    {
        return Err(ImportError::IdentityColumnUnmapped {
            column: identity.column.clone(),
        });
    }

    for (column, draft) in mappings.drafts() {
        if !draft.kind.is_creatable() {
            return Err(ImportError::UnsupportedFieldKind {
                column: column.to_string(),
                kind: draft.kind,
            });
        }
        if draft.kind == FieldKind::LinkToTable && draft.options.linked_table_id().is_none() {
            return Err(ImportError::MissingLinkTarget {
                column: column.to_string(),
            });
        }
        if draft.kind.is_choice() && draft.options.choices().is_empty() {
            return Err(ImportError::EmptyChoiceDomain {
                column: column.to_string(),
                kind: draft.kind,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CreationState {
    PreCheck,
    Submit { attempt: u32 },
    Resolve { attempt: u32 },
    Done {
        field: SchemaField,
        outcome: FieldOutcome,
    },
}

/// Creates every planned field, downgrading plans to existing fields when
/// another writer got there first. Mappings are updated in place and each
/// resolved field is pushed to `resolved` as soon as it exists, so a stop
/// part way still leaves the finished ones there.
pub async fn materialize<S>(
    ctx: &ImportContext<'_>,
    service: &S,
    mappings: &mut MappingTable,
    resolved: &mut Vec<MaterializedField>,
) -> Result<(), StageError>
where
    S: SchemaService + ?Sized,
{
    let before = resolved.len();
    for entry in mappings.entries.iter_mut() {
        let ColumnMapping::ToCreate(draft) = &entry.mapping else {
            continue;
        };
        let materialized = create_or_resolve(ctx, service, &entry.column, draft).await?;
        entry.mapping = ColumnMapping::Mapped(materialized.field.clone());
        resolved.push(materialized);
    }
    if resolved.len() > before {
        info!(
            "Materialized {} field(s) in table '{}'",
            resolved.len() - before,
            ctx.table_id
        );
    }
    Ok(())
}

async fn create_or_resolve<S>(
    ctx: &ImportContext<'_>,
    service: &S,
    column: &str,
    draft: &FieldDraft,
) -> Result<MaterializedField, StageError>
where
    S: SchemaService + ?Sized,
{
    let policy = &ctx.options.creation_retry;
    let mut submissions = 0u32;
    let mut state = CreationState::PreCheck;
    loop {
        debug!("Field '{}' (column '{column}'): {state:?}", draft.name);
        state = match state {
            CreationState::PreCheck => match find_latest(ctx, service, &draft.name).await? {
                Some(field) => {
                    info!(
                        "Field '{}' already exists in table '{}'; mapping column '{column}' to it",
                        field.name, ctx.table_id
                    );
                    CreationState::Done {
                        field,
                        outcome: FieldOutcome::AlreadyExisted,
                    }
                }
                None => CreationState::Submit { attempt: 0 },
            },
            CreationState::Submit { attempt } => {
                ctx.checkpoint()?;
                submissions += 1;
                match service.create_field(ctx.table_id, draft).await {
                    Ok(field) => CreationState::Done {
                        field,
                        outcome: if attempt == 0 {
                            FieldOutcome::Created
                        } else {
                            FieldOutcome::ResolvedAfterConflict
                        },
                    },
                    Err(CreateFieldError::Conflict { .. })
                        if attempt + 1 < CREATION_SUBMISSIONS =>
                    {
                        warn!(
                            "Creating field '{}' conflicted with a concurrent change; re-reading schema",
                            draft.name
                        );
                        CreationState::Resolve { attempt }
                    }
                    Err(CreateFieldError::Conflict { .. }) => {
                        return Err(ImportError::FieldConflict {
                            column: column.to_string(),
                            field: draft.name.clone(),
                        }
                        .into());
                    }
                    Err(CreateFieldError::Service(source)) => {
                        return Err(ImportError::Service {
                            operation: "create_field",
                            table: ctx.table_id.to_string(),
                            source,
                        }
                        .into());
                    }
                }
            }
            CreationState::Resolve { attempt } => {
                ctx.pause(policy.delay_for(attempt)).await?;
                match find_latest(ctx, service, &draft.name).await? {
                    Some(field) => CreationState::Done {
                        field,
                        outcome: FieldOutcome::ResolvedAfterConflict,
                    },
                    None => CreationState::Submit {
                        attempt: attempt + 1,
                    },
                }
            }
            CreationState::Done { field, outcome } => {
                return Ok(MaterializedField {
                    column: column.to_string(),
                    field,
                    outcome,
                    submissions,
                });
            }
        };
    }
}

pub async fn await_visibility<S>(
    ctx: &ImportContext<'_>,
    service: &S,
    materialized: &[MaterializedField],
) -> Result<Vec<SchemaField>, StageError>
where
    S: SchemaService + ?Sized,
{
    let policy = &ctx.options.visibility_retry;
    let expected = materialized
        .iter()
        .filter(|m| m.outcome != FieldOutcome::AlreadyExisted)
        .map(|m| m.field.name.as_str())
        .collect::<Vec<_>>();
    let mut attempt = 0u32;
    loop {
        let fields = list_fields(ctx, service).await?;
        let missing = expected
            .iter()
            .filter(|name| !fields.iter().any(|f| names_match(name, &f.name)))
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        if missing.is_empty() {
            if attempt > 0 {
                info!("All new field(s) visible after {} poll(s)", attempt + 1);
            }
            return Ok(fields);
        }
        attempt += 1;
        if attempt >= policy.max_attempts {
            return Err(ImportError::FieldsNotVisible {
                table: ctx.table_id.to_string(),
                missing,
                attempts: attempt,
            }
            .into());
        }
        debug!(
            "{} new field(s) not yet visible (attempt {attempt}/{})",
            missing.len(),
            policy.max_attempts
        );
        ctx.pause(policy.delay_for(attempt - 1)).await?;
    }
}

pub(crate) async fn list_fields<S>(
    ctx: &ImportContext<'_>,
    service: &S,
) -> Result<Vec<SchemaField>, StageError>
where
    S: SchemaService + ?Sized,
{
    ctx.guarded(service.list_fields(ctx.table_id))
        .await?
        .map_err(|source| {
            ImportError::Service {
                operation: "list_fields",
                table: ctx.table_id.to_string(),
                source,
            }
            .into()
        })
}

async fn find_latest<S>(
    ctx: &ImportContext<'_>,
    service: &S,
    name: &str,
) -> Result<Option<SchemaField>, StageError>
where
    S: SchemaService + ?Sized,
{
    let fields = list_fields(ctx, service).await?;
    Ok(find_field(&fields, name).cloned())
}

/// Exact (case-insensitive) name matches win over sanitized matches.
fn find_field<'f>(fields: &'f [SchemaField], name: &str) -> Option<&'f SchemaField> {
    let wanted = column_key(name).to_lowercase();
    fields
        .iter()
        .find(|f| column_key(&f.name).to_lowercase() == wanted)
        .or_else(|| fields.iter().find(|f| names_match(name, &f.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ImportOptions, parser::parse_text};
    use tokio_util::sync::CancellationToken;

    fn plan(
        csv: &str,
        existing: &[SchemaField],
        directives: &ColumnDirectives,
    ) -> Result<MappingTable, ImportError> {
        let options = ImportOptions::default();
        let cancel = CancellationToken::new();
        let ctx = ImportContext::new("tasks", &options, &cancel);
        let table = parse_text(csv, b',').unwrap();
        plan_mappings(&ctx, &table, existing, directives)
    }

    #[test]
    fn columns_match_existing_fields_by_raw_or_sanitized_name() {
        let existing = vec![
            SchemaField::new("task_name", FieldKind::Text),
            SchemaField::new("Due Date", FieldKind::Date),
        ];
        let table = plan(
            "Task Name,due_date,Status\nA,2024-01-01,Open\n",
            &existing,
            &ColumnDirectives::new(),
        )
        .unwrap();
        assert_eq!(
            table.entries()[0].mapping,
            ColumnMapping::Mapped(existing[0].clone())
        );
        assert_eq!(
            table.entries()[1].mapping,
            ColumnMapping::Mapped(existing[1].clone())
        );
        assert!(matches!(
            &table.entries()[2].mapping,
            ColumnMapping::ToCreate(draft) if draft.name == "status"
        ));
    }

    #[test]
    fn overrides_take_precedence_over_matching() {
        let existing = vec![
            SchemaField::new("title", FieldKind::Text),
            SchemaField::new("status", FieldKind::SingleChoice),
        ];
        let directives = ColumnDirectives::new()
            .map_to("Name", "title")
            .create("Status")
            .skip("Notes")
            .kind("Status", FieldKind::Text);
        let table = plan("Name,Status,Notes\nA,Open,x\n", &existing, &directives).unwrap();
        assert_eq!(
            table.entries()[0].mapping,
            ColumnMapping::Mapped(existing[0].clone())
        );
        assert_eq!(
            table.entries()[1].mapping,
            ColumnMapping::ToCreate(FieldDraft::new("status_2", FieldKind::Text))
        );
        assert_eq!(table.entries()[2].mapping, ColumnMapping::Skipped);
    }

    #[test]
    fn mapping_to_a_missing_field_lists_available_fields() {
        let existing = vec![SchemaField::new("title", FieldKind::Text)];
        let directives = ColumnDirectives::new().map_to("Name", "headline");
        let err = plan("Name\nA\n", &existing, &directives).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("headline"));
        assert!(message.contains("Available fields: title"));
    }

    #[test]
    fn lookup_fields_and_repeated_targets_are_skipped() {
        let existing = vec![
            SchemaField::new("id_code", FieldKind::Text),
            SchemaField::new("owner", FieldKind::Lookup),
        ];
        let directives = ColumnDirectives::new().map_to("Code", "id_code");
        let table = plan("id code,Owner,Code\n1,x,2\n", &existing, &directives).unwrap();
        assert!(matches!(table.entries()[0].mapping, ColumnMapping::Mapped(_)));
        assert_eq!(table.entries()[1].mapping, ColumnMapping::Skipped);
        assert_eq!(table.entries()[2].mapping, ColumnMapping::Skipped);
    }

    #[test]
    fn new_fields_get_inferred_kinds_and_unique_names() {
        let table = plan(
            "Status,status!,Amount\nOpen,a,$1\nOpen,b,$2\nClosed,c,$3\nOpen,d,$4\n",
            &[],
            &ColumnDirectives::new(),
        )
        .unwrap();
        let drafts = table.drafts().map(|(_, d)| d.clone()).collect::<Vec<_>>();
        assert_eq!(drafts[0].name, "status");
        assert_eq!(drafts[0].kind, FieldKind::SingleChoice);
        assert_eq!(drafts[1].name, "status_2");
        assert_eq!(drafts[2].kind, FieldKind::Currency);
    }

    #[test]
    fn choices_and_links_are_attached_to_drafts() {
        let csv = "Status,Project\nOpen,p1\nOpen,p2\nClosed,p3\nOpen,p1\n";
        let directives = ColumnDirectives::new()
            .kind("Project", FieldKind::LinkToTable)
            .link("Project", "tbl_projects");
        let mut table = plan(csv, &[], &directives).unwrap();
        let parsed = parse_text(csv, b',').unwrap();
        attach_choices(&mut table, &parsed, 100);
        attach_links(&mut table, &directives);
        let drafts = table.drafts().map(|(_, d)| d.clone()).collect::<Vec<_>>();
        assert_eq!(drafts[0].options.choices(), ["Closed", "Open"]);
        assert_eq!(drafts[1].options.linked_table_id(), Some("tbl_projects"));
        assert!(validate_plans(&table).is_ok());
    }

    #[test]
    fn validation_rejects_uncreatable_plans() {
        let csv = "Key,Derived\nk1,x\n";
        let table = plan(
            csv,
            &[],
            &ColumnDirectives::new().kind("Derived", FieldKind::Lookup),
        )
        .unwrap();
        assert!(matches!(
            validate_plans(&table),
            Err(ImportError::UnsupportedFieldKind { kind: FieldKind::Lookup, .. })
        ));

        let table = plan(
            csv,
            &[],
            &ColumnDirectives::new().kind("Derived", FieldKind::LinkToTable),
        )
        .unwrap();
        assert!(matches!(
            validate_plans(&table),
            Err(ImportError::MissingLinkTarget { column }) if column == "Derived"
        ));

        let table = plan(
            csv,
            &[],
            &ColumnDirectives::new().kind("Derived", FieldKind::MultiChoice),
        )
        .unwrap();
        assert!(matches!(
            validate_plans(&table),
            Err(ImportError::EmptyChoiceDomain { .. })
        ));
    }

    #[test]
    fn skipped_identity_column_is_fatal() {
        let table = plan("Key,Name\n1,a\n", &[], &ColumnDirectives::new().skip("Key")).unwrap();
        let err = validate_plans(&table).unwrap_err();
        assert!(matches!(err, ImportError::IdentityColumnUnmapped { column } if column == "Key"));
    }

    #[test]
    fn literal_field_names_always_map_to_that_field() {
        let existing = vec![
            SchemaField::new("status", FieldKind::SingleChoice),
            SchemaField::new("Order ID", FieldKind::Text),
            SchemaField::new("select_field", FieldKind::Text),
        ];
        for field in &existing {
            let csv = format!("{}\nvalue\n", field.name);
            let table = plan(&csv, &existing, &ColumnDirectives::new()).unwrap();
            assert_eq!(
                table.entries()[0].mapping,
                ColumnMapping::Mapped(field.clone())
            );
        }
    }
}
