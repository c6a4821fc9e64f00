//! Per-invocation context threaded through every pipeline stage.

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{config::ImportOptions, error::ImportError, infer::InferenceSettings};

/// Why a stage stopped early.
#[derive(Debug)]
pub enum StageError {
    /// The caller cancelled the import. Not a failure.
    Cancelled,
    Fatal(ImportError),
}

impl From<ImportError> for StageError {
    fn from(err: ImportError) -> Self {
        StageError::Fatal(err)
    }
}

/// Immutable view of one import invocation.
#[derive(Debug, Clone, Copy)]
pub struct ImportContext<'a> {
    pub table_id: &'a str,
    pub options: &'a ImportOptions,
    cancel: &'a CancellationToken,
}

impl<'a> ImportContext<'a> {
    pub fn new(
        table_id: &'a str,
        options: &'a ImportOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            table_id,
            options,
            cancel,
        }
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        self.options.inference_settings()
    }

    /// Fails with [`StageError::Cancelled`] once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Awaits `future` unless cancellation arrives first. Only for calls
    /// without side effects; abandoning a write would leave its outcome
    /// unknown.
    pub async fn guarded<F, T>(&self, future: F) -> Result<T, StageError>
    where
        F: Future<Output = T>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StageError::Cancelled),
            output = future => Ok(output),
        }
    }

    pub async fn pause(&self, delay: Duration) -> Result<(), StageError> {
        if delay.is_zero() {
            return self.checkpoint();
        }
        self.guarded(tokio::time::sleep(delay)).await
    }
}
