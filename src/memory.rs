//! In-process table implementing both [`SchemaService`] and [`RowStore`].
//!
//! Backs the command line (persisted as a JSON snapshot) and the test
//! suites. A [`FaultPlan`] makes it behave like a busy multi-writer
//! backend: schema reads that lag behind creations, fields created by
//! someone else mid-import, rejected batches and cancellation mid-write.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    dedupe::normalize_key,
    schema::{FieldDraft, FieldKind, SchemaField, names_match},
    service::{CreateFieldError, InsertAck, RowStore, SchemaService, ServiceError},
    value::Record,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    pub values: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub table_id: String,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub records: Vec<StoredRecord>,
}

impl TableSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening table snapshot {path:?}"))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing table snapshot {path:?}"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating table snapshot {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing table snapshot {path:?}"))
    }
}

/// Misbehaviour to inject.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    pub visibility_lag: u32,
    pub concurrent_fields: Vec<SchemaField>,
    pub persistent_conflicts: Vec<String>,
    pub fail_batch: Option<(usize, ServiceError)>,
    pub ack_limit: Option<usize>,
    pub cancel_after_batch: Option<(usize, CancellationToken)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_fields: usize,
    pub create_field: usize,
    pub existing_keys: usize,
    pub insert_batch: usize,
}

#[derive(Debug)]
struct State {
    snapshot: TableSnapshot,
    faults: FaultPlan,
    hidden: Vec<(String, u32)>,
    calls: CallCounts,
}

#[derive(Debug)]
pub struct InMemoryTable {
    state: Mutex<State>,
}

impl InMemoryTable {
    pub fn new(table_id: impl Into<String>) -> Self {
        Self::from_snapshot(TableSnapshot {
            table_id: table_id.into(),
            ..TableSnapshot::default()
        })
    }

    pub fn from_snapshot(snapshot: TableSnapshot) -> Self {
        Self {
            state: Mutex::new(State {
                snapshot,
                faults: FaultPlan::default(),
                hidden: Vec::new(),
                calls: CallCounts::default(),
            }),
        }
    }

    pub fn with_fields<I>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = SchemaField>,
    {
        self.state().snapshot.fields.extend(fields);
        self
    }

    pub fn with_records<I>(self, records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        self.state()
            .snapshot
            .records
            .extend(records.into_iter().map(|values| StoredRecord {
                id: Uuid::new_v4(),
                values,
            }));
        self
    }

    pub fn require(self, field: impl Into<String>) -> Self {
        self.state().snapshot.required_fields.push(field.into());
        self
    }

    pub fn with_faults(self, faults: FaultPlan) -> Self {
        self.state().faults = faults;
        self
    }

    pub fn add_field(&self, field: SchemaField) {
        self.state().snapshot.fields.push(field);
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.state().snapshot.clone()
    }

    pub fn fields(&self) -> Vec<SchemaField> {
        self.state().snapshot.fields.clone()
    }

    pub fn records(&self) -> Vec<Record> {
        self.state()
            .snapshot
            .records
            .iter()
            .map(|record| record.values.clone())
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn check_table(&self, table_id: &str) -> Result<(), ServiceError> {
        if table_id == self.snapshot.table_id {
            Ok(())
        } else {
            Err(ServiceError::with_code(
                "PGRST205",
                format!("Could not find the table '{table_id}' in the schema cache"),
            ))
        }
    }

    fn has_field(&self, name: &str) -> bool {
        self.snapshot
            .fields
            .iter()
            .any(|field| field.name.eq_ignore_ascii_case(name))
    }

    fn validate(&self, record: &Record) -> Result<(), ServiceError> {
        if let Some(unknown) = record.keys().find(|name| !self.has_field(name)) {
            return Err(ServiceError::with_code(
                "PGRST204",
                format!(
                    "Could not find the '{unknown}' column of '{}' in the schema cache",
                    self.snapshot.table_id
                ),
            ));
        }
        let missing = self
            .snapshot
            .required_fields
            .iter()
            .find(|required| record.get(*required).is_none_or(|value| value.is_null()));
        if let Some(field) = missing {
            return Err(ServiceError::with_code(
                "23502",
                format!("null value in column \"{field}\" violates not-null constraint"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaService for InMemoryTable {
    async fn list_fields(&self, table_id: &str) -> Result<Vec<SchemaField>, ServiceError> {
        let mut state = self.state();
        state.calls.list_fields += 1;
        state.check_table(table_id)?;
        let visible = state
            .snapshot
            .fields
            .iter()
            .filter(|field| !state.hidden.iter().any(|(name, _)| name == &field.name))
            .cloned()
            .collect();
        state.hidden.retain_mut(|(_, remaining)| {
            *remaining -= 1;
            *remaining > 0
        });
        Ok(visible)
    }

    async fn create_field(
        &self,
        table_id: &str,
        draft: &FieldDraft,
    ) -> Result<SchemaField, CreateFieldError> {
        let mut state = self.state();
        state.calls.create_field += 1;
        state.check_table(table_id)?;

        let conflict = || CreateFieldError::Conflict {
            name: draft.name.clone(),
        };
        if state
            .faults
            .persistent_conflicts
            .iter()
            .any(|name| names_match(name, &draft.name))
        {
            return Err(conflict());
        }
        if let Some(position) = state
            .faults
            .concurrent_fields
            .iter()
            .position(|field| names_match(&field.name, &draft.name))
        {
            let field = state.faults.concurrent_fields.remove(position);
            state.snapshot.fields.push(field);
            return Err(conflict());
        }
        if state.has_field(&draft.name) {
            return Err(conflict());
        }
        if draft.kind == FieldKind::Lookup {
            return Err(ServiceError::with_code(
                "400",
                format!("Field '{}': lookup fields cannot be created", draft.name),
            )
            .into());
        }

        let field = draft.clone().into_field();
        state.snapshot.fields.push(field.clone());
        let lag = state.faults.visibility_lag;
        if lag > 0 {
            state.hidden.push((field.name.clone(), lag));
        }
        Ok(field)
    }
}

#[async_trait]
impl RowStore for InMemoryTable {
    async fn existing_keys(
        &self,
        table_id: &str,
        field: &str,
        candidates: &[String],
    ) -> Result<HashSet<String>, ServiceError> {
        let mut state = self.state();
        state.calls.existing_keys += 1;
        state.check_table(table_id)?;
        if !state.has_field(field) {
            return Err(ServiceError::with_code(
                "PGRST204",
                format!(
                    "Could not find the '{field}' column of '{table_id}' in the schema cache"
                ),
            ));
        }
        let wanted = candidates.iter().collect::<HashSet<_>>();
        Ok(state
            .snapshot
            .records
            .iter()
            .filter_map(|record| record.values.get(field))
            .map(|value| normalize_key(&value.as_display()))
            .filter(|key| wanted.contains(key))
            .collect())
    }

    async fn insert_batch(
        &self,
        table_id: &str,
        rows: &[Record],
    ) -> Result<InsertAck, ServiceError> {
        let mut state = self.state();
        state.calls.insert_batch += 1;
        state.check_table(table_id)?;
        let call = state.calls.insert_batch;

        if let Some((_, err)) = state
            .faults
            .fail_batch
            .as_ref()
            .filter(|(batch, _)| *batch == call)
        {
            return Err(err.clone());
        }
        for record in rows {
            state.validate(record)?;
        }

        let accepted = state
            .faults
            .ack_limit
            .map_or(rows.len(), |limit| limit.min(rows.len()));
        state
            .snapshot
            .records
            .extend(rows.iter().take(accepted).map(|values| StoredRecord {
                id: Uuid::new_v4(),
                values: values.clone(),
            }));
        if let Some((_, token)) = state
            .faults
            .cancel_after_batch
            .as_ref()
            .filter(|(batch, _)| *batch == call)
        {
            token.cancel();
        }
        Ok(InsertAck { inserted: accepted })
    }
}
