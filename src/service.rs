//! Boundary traits for the two external collaborators: the schema service
//! that lists and creates fields, and the row store that answers key
//! lookups and accepts batches of records.
//!
//! Both are multi-writer resources. Nothing here assumes exclusive access;
//! the reconciler and duplicate detector treat every response as a snapshot.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    schema::{FieldDraft, SchemaField},
    value::Record,
};

/// Error reported by either external service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            details: None,
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Code, message and details rendered on one line.
    pub fn describe(&self) -> String {
        let mut out = match &self.code {
            Some(code) => format!("[{code}] {}", self.message),
            None => self.message.clone(),
        };
        if let Some(details) = &self.details {
            out.push_str(" (");
            out.push_str(details);
            out.push(')');
        }
        out
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreateFieldError {
    #[error("field '{name}' already exists")]
    Conflict { name: String },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Acknowledgement of an inserted batch. `inserted` may be lower than the
/// number of rows submitted when the store skips rows on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertAck {
    pub inserted: usize,
}

#[async_trait]
pub trait SchemaService: Send + Sync {
    async fn list_fields(&self, table_id: &str) -> Result<Vec<SchemaField>, ServiceError>;

    async fn create_field(
        &self,
        table_id: &str,
        draft: &FieldDraft,
    ) -> Result<SchemaField, CreateFieldError>;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Returns the subset of `candidates` (already normalized with
    /// [`crate::dedupe::normalize_key`]) present in `field` of stored
    /// records, normalized the same way.
    async fn existing_keys(
        &self,
        table_id: &str,
        field: &str,
        candidates: &[String],
    ) -> Result<HashSet<String>, ServiceError>;

    /// Inserts rows in the given order. A failed call inserts nothing.
    async fn insert_batch(&self, table_id: &str, rows: &[Record])
    -> Result<InsertAck, ServiceError>;
}
