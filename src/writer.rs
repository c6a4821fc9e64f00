//! Sequential batch writer.
//!
//! Batches are submitted one at a time in source order. Each acknowledged
//! batch is durable and is never rolled back, so a failure or cancellation
//! reports how many rows were already committed.

use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use similar::TextDiff;

use crate::{
    context::{ImportContext, StageError},
    error::{BatchFailure, ImportError},
    service::{RowStore, ServiceError},
    value::Record,
};

const UNKNOWN_COLUMN_CODES: &[&str] = &["PGRST204", "42703"];
const NOT_NULL_CODES: &[&str] = &["23502"];
const SUGGESTION_MIN_RATIO: f32 = 0.6;

static QUOTED_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)column\s+['"]([^'"]+)['"]|the\s+'([^']+)'\s+column"#)
        .expect("valid column name regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteProgress {
    pub imported_rows: usize,
    pub committed_batches: usize,
}

#[derive(Debug)]
pub struct WriteOutcome {
    pub progress: WriteProgress,
    pub stop: Option<StageError>,
}

/// Writes `rows` in batches of the configured size. Cancellation is only
/// observed between batches; an in-flight insert always runs to completion.
pub async fn write_batches<S>(
    ctx: &ImportContext<'_>,
    store: &S,
    rows: &[Record],
    known_fields: &[String],
) -> WriteOutcome
where
    S: RowStore + ?Sized,
{
    let batch_size = ctx.options.batch_size.max(1);
    let total_batches = rows.len().div_ceil(batch_size);
    let mut progress = WriteProgress::default();

    for (index, batch) in rows.chunks(batch_size).enumerate() {
        let number = index + 1;
        if let Err(stop) = ctx.checkpoint() {
            info!(
                "Import cancelled before batch {number}/{total_batches}; {} row(s) already imported",
                progress.imported_rows
            );
            return WriteOutcome {
                progress,
                stop: Some(stop),
            };
        }
        match store.insert_batch(ctx.table_id, batch).await {
            Ok(ack) => {
                let inserted = ack.inserted.min(batch.len());
                if inserted < batch.len() {
                    warn!(
                        "Batch {number} acknowledged {inserted} of {} row(s)",
                        batch.len()
                    );
                }
                progress.imported_rows += inserted;
                progress.committed_batches += 1;
                debug!(
                    "Batch {number}/{total_batches} committed ({} row(s) so far)",
                    progress.imported_rows
                );
            }
            Err(err) => {
                warn!("Batch {number} rejected: {}", err.describe());
                return WriteOutcome {
                    progress,
                    stop: Some(StageError::Fatal(ImportError::BatchWrite {
                        batch: number,
                        committed_rows: progress.imported_rows,
                        failure: classify_store_error(&err, known_fields),
                    })),
                };
            }
        }
    }

    info!(
        "Wrote {} row(s) in {} batch(es) to table '{}'",
        progress.imported_rows, progress.committed_batches, ctx.table_id
    );
    WriteOutcome {
        progress,
        stop: None,
    }
}

pub fn classify_store_error(err: &ServiceError, known_fields: &[String]) -> BatchFailure {
    let code = err.code.as_deref().unwrap_or_default();
    let message = err.message.to_ascii_lowercase();
    let column = quoted_column(&err.message)
        .or_else(|| err.details.as_deref().and_then(quoted_column));

    let unknown_column = UNKNOWN_COLUMN_CODES.contains(&code)
        || message.contains("schema cache")
        || (message.contains("column") && message.contains("does not exist"));
    if unknown_column {
        return BatchFailure::UnknownColumn {
            suggestion: column
                .as_deref()
                .and_then(|column| closest_field(column, known_fields)),
            column,
            known_fields: known_fields.to_vec(),
        };
    }

    if NOT_NULL_CODES.contains(&code)
        || message.contains("not-null")
        || message.contains("null value")
    {
        return BatchFailure::MissingRequired {
            field: column,
            detail: err.describe(),
        };
    }

    BatchFailure::Store {
        detail: err.describe(),
    }
}

fn quoted_column(text: &str) -> Option<String> {
    let captures = QUOTED_COLUMN.captures(text)?;
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().to_string())
}

fn closest_field(column: &str, known_fields: &[String]) -> Option<String> {
    let wanted = column.to_lowercase();
    known_fields
        .iter()
        .map(|field| {
            let candidate = field.to_lowercase();
            let ratio = TextDiff::from_chars(wanted.as_str(), candidate.as_str()).ratio();
            (field, ratio)
        })
        .filter(|(_, ratio)| *ratio >= SUGGESTION_MIN_RATIO)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(field, _)| field.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn schema_cache_errors_name_the_column_and_suggest_a_field() {
        let err = ServiceError::with_code(
            "PGRST204",
            "Could not find the 'titel' column of 'tasks' in the schema cache",
        );
        let failure = classify_store_error(&err, &fields(&["title", "status"]));
        assert_eq!(
            failure,
            BatchFailure::UnknownColumn {
                column: Some("titel".to_string()),
                known_fields: fields(&["title", "status"]),
                suggestion: Some("title".to_string()),
            }
        );
        let message = failure.to_string();
        assert!(message.contains("did you mean 'title'?"));
        assert!(message.contains("Known fields: title, status"));
    }

    #[test]
    fn postgres_undefined_column_is_recognized() {
        let err = ServiceError::with_code(
            "42703",
            r#"column "zzz_unrelated" of relation "tasks" does not exist"#,
        );
        match classify_store_error(&err, &fields(&["title"])) {
            BatchFailure::UnknownColumn {
                column, suggestion, ..
            } => {
                assert_eq!(column.as_deref(), Some("zzz_unrelated"));
                assert_eq!(suggestion, None);
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn unknown_column_without_a_quoted_name_keeps_known_fields() {
        let err = ServiceError::with_code("PGRST204", "Column not found in the schema cache");
        let failure = classify_store_error(&err, &fields(&["title", "status"]));
        assert_eq!(
            failure,
            BatchFailure::UnknownColumn {
                column: None,
                known_fields: fields(&["title", "status"]),
                suggestion: None,
            }
        );
        assert!(failure.to_string().contains("Known fields: title, status"));

        let uncoded = ServiceError::new("relation cache is stale: schema cache miss");
        assert!(matches!(
            classify_store_error(&uncoded, &[]),
            BatchFailure::UnknownColumn { column: None, .. }
        ));
    }

    #[test]
    fn not_null_violations_name_the_field() {
        let err = ServiceError::with_code(
            "23502",
            r#"null value in column "owner" violates not-null constraint"#,
        )
        .details("Failing row contains (null)");
        match classify_store_error(&err, &[]) {
            BatchFailure::MissingRequired { field, detail } => {
                assert_eq!(field.as_deref(), Some("owner"));
                assert!(detail.contains("[23502]"));
                assert!(detail.contains("Failing row"));
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn other_errors_keep_the_store_message() {
        let err = ServiceError::new("connection reset");
        assert_eq!(
            classify_store_error(&err, &[]),
            BatchFailure::Store {
                detail: "connection reset".to_string()
            }
        );
    }
}
