//! Bounded retry policies with exponential backoff.

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::schema_visibility()
    }
}

impl RetryPolicy {
    pub fn field_creation() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }

    pub fn schema_visibility() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 3_000,
            backoff_multiplier: 1.5,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let millis = (self.base_delay_ms as f64 * multiplier).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    pub fn ensure_valid(&self, label: &str) -> Result<()> {
        ensure!(self.max_attempts > 0, "{label}: max_attempts must be positive");
        ensure!(
            self.backoff_multiplier >= 1.0,
            "{label}: backoff_multiplier must be at least 1.0"
        );
        ensure!(
            self.base_delay_ms <= self.max_delay_ms,
            "{label}: base_delay_ms ({}) cannot exceed max_delay_ms ({})",
            self.base_delay_ms,
            self.max_delay_ms
        );
        Ok(())
    }
}
