//! Duplicate detection on the identity field.
//!
//! Keys are compared after [`normalize_key`]. The store is queried once, for
//! all distinct keys, before any batch is written; rows another writer
//! inserts after that query are not seen.

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use log::{debug, info};

use crate::{
    context::{ImportContext, StageError},
    error::ImportError,
    report::{SkipReason, SkippedRow},
    schema::collapse_whitespace,
    service::RowStore,
    value::CandidateRow,
};

pub fn normalize_key(value: &str) -> String {
    collapse_whitespace(value).to_lowercase()
}

pub fn candidate_key(candidate: &CandidateRow, key_field: &str) -> Option<String> {
    candidate
        .value(key_field)
        .map(|value| normalize_key(&value.as_display()))
        .filter(|key| !key.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Import,
    SkipDuplicate {
        reason: SkipReason,
        value: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicatePartition {
    pub verdicts: BTreeMap<usize, DuplicateVerdict>,
    pub importable: Vec<CandidateRow>,
    pub skipped: Vec<SkippedRow>,
}

pub fn partition(
    candidates: Vec<CandidateRow>,
    key_field: &str,
    existing: &HashSet<String>,
    skip_in_file_duplicates: bool,
) -> DuplicatePartition {
    let mut seen = HashSet::new();
    let mut result = DuplicatePartition::default();
    for candidate in candidates {
        let raw = candidate.value(key_field).map(|value| value.as_display());
        let verdict = match candidate_key(&candidate, key_field) {
            None => Some(SkipReason::EmptyKey),
            Some(key) if existing.contains(&key) => Some(SkipReason::DuplicateOfExisting),
            Some(key) if skip_in_file_duplicates && !seen.insert(key.clone()) => {
                Some(SkipReason::DuplicateInFile)
            }
            Some(_) => None,
        };
        match verdict {
            None => {
                result
                    .verdicts
                    .insert(candidate.source_index, DuplicateVerdict::Import);
                result.importable.push(candidate);
            }
            Some(reason) => {
                let value = raw.filter(|value| !value.trim().is_empty());
                result.verdicts.insert(
                    candidate.source_index,
                    DuplicateVerdict::SkipDuplicate {
                        reason,
                        value: value.clone(),
                    },
                );
                result.skipped.push(SkippedRow {
                    row: candidate.row_number(),
                    reason,
                    value,
                });
            }
        }
    }
    result
}

pub async fn detect<S>(
    ctx: &ImportContext<'_>,
    store: &S,
    candidates: Vec<CandidateRow>,
    key_field: &str,
) -> Result<DuplicatePartition, StageError>
where
    S: RowStore + ?Sized,
{
    let keys = candidates
        .iter()
        .filter_map(|candidate| candidate_key(candidate, key_field))
        .unique()
        .collect::<Vec<_>>();

    let existing = if keys.is_empty() {
        HashSet::new()
    } else {
        debug!(
            "Checking {} distinct key(s) against field '{key_field}'",
            keys.len()
        );
        ctx.guarded(store.existing_keys(ctx.table_id, key_field, &keys))
            .await?
            .map_err(|source| ImportError::Service {
                operation: "existing_keys",
                table: ctx.table_id.to_string(),
                source,
            })?
            .iter()
            .map(|key| normalize_key(key))
            .collect()
    };

    let result = partition(
        candidates,
        key_field,
        &existing,
        ctx.options.skip_in_file_duplicates,
    );
    info!(
        "Duplicate check on '{key_field}': {} importable, {} skipped",
        result.importable.len(),
        result.skipped.len()
    );
    Ok(result)
}
