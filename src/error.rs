//! Fatal error taxonomy for an import invocation.
//!
//! Every variant renders a message that can be shown to the user as-is:
//! it names the offending column, field, or value and, when batches were
//! already committed, how many rows made it into the table.
//!
//! Row-level outcomes (duplicate or empty keys) are never errors; they are
//! reported through [`crate::report::ImportSummary::skipped_details`].

use thiserror::Error;

use crate::{schema::FieldKind, service::ServiceError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("The source file does not contain any columns")]
    EmptySource,

    #[error("Failed to read the source file: {detail}")]
    Source { detail: String },

    #[error("Service call '{operation}' failed for table '{table}': {source}")]
    Service {
        operation: &'static str,
        table: String,
        #[source]
        source: ServiceError,
    },

    #[error(
        "Column '{column}' is mapped to field '{field}', which does not exist in table '{table}'. Available fields: {}",
        render_list(.available)
    )]
    UnknownTargetField {
        column: String,
        field: String,
        table: String,
        available: Vec<String>,
    },

    #[error(
        "The first column '{column}' identifies records and must be mapped to a field; it is currently skipped"
    )]
    IdentityColumnUnmapped { column: String },

    #[error(
        "Column '{column}' cannot create a field of kind '{kind}': that kind is derived and cannot be imported"
    )]
    UnsupportedFieldKind { column: String, kind: FieldKind },

    #[error("Column '{column}' would create a link field but no target table was selected")]
    MissingLinkTarget { column: String },

    #[error("Column '{column}' would create a {kind} field but contains no usable choice values")]
    EmptyChoiceDomain { column: String, kind: FieldKind },

    #[error(
        "Field '{field}' for column '{column}' was created concurrently by another import and could not be resolved"
    )]
    FieldConflict { column: String, field: String },

    #[error(
        "Newly created field(s) {} did not become visible in table '{table}' after {attempts} attempt(s)",
        render_list(.missing)
    )]
    FieldsNotVisible {
        table: String,
        missing: Vec<String>,
        attempts: u32,
    },

    #[error("No rows to import: {skipped} of {total} row(s) were skipped")]
    NoImportableRows { total: usize, skipped: usize },

    #[error("Batch {batch} failed after {committed_rows} row(s) were already imported: {failure}")]
    BatchWrite {
        batch: usize,
        committed_rows: usize,
        failure: BatchFailure,
    },

    #[error(
        "{error}. Field(s) added to table '{table}' before the failure: {}",
        render_list(.created)
    )]
    AfterFieldsCreated {
        table: String,
        created: Vec<String>,
        error: Box<ImportError>,
    },
}

impl ImportError {
    pub fn committed_rows(&self) -> Option<usize> {
        match self.cause() {
            ImportError::BatchWrite { committed_rows, .. } => Some(*committed_rows),
            _ => None,
        }
    }

    pub fn cause(&self) -> &ImportError {
        match self {
            ImportError::AfterFieldsCreated { error, .. } => error.cause(),
            other => other,
        }
    }

    pub fn created_fields(&self) -> &[String] {
        match self {
            ImportError::AfterFieldsCreated { created, .. } => created,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchFailure {
    #[error(
        "{}{}. Known fields: {}",
        unknown_column(.column),
        suggestion_hint(.suggestion),
        render_list(.known_fields)
    )]
    UnknownColumn {
        column: Option<String>,
        known_fields: Vec<String>,
        suggestion: Option<String>,
    },

    #[error(
        "a required field{} is missing data ({detail})",
        field_hint(.field)
    )]
    MissingRequired {
        field: Option<String>,
        detail: String,
    },

    #[error("the row store rejected the batch: {detail}")]
    Store { detail: String },
}

fn render_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn unknown_column(column: &Option<String>) -> String {
    match column {
        Some(name) => format!("the table has no column '{name}'"),
        None => "the batch names a column the table does not have".to_string(),
    }
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_deref()
        .map(|name| format!(" (did you mean '{name}'?)"))
        .unwrap_or_default()
}

fn field_hint(field: &Option<String>) -> String {
    field
        .as_deref()
        .map(|name| format!(" '{name}'"))
        .unwrap_or_default()
}
