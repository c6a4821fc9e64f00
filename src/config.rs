//! Import options, loadable from a YAML file.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```yaml
//! batch_size: 250
//! sample_size: 200
//! match_threshold_percent: 40
//! visibility_retry:
//!   max_attempts: 12
//!   base_delay_ms: 200
//! ```

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    choices::DEFAULT_CHOICE_LIMIT,
    infer::{
        DEFAULT_HEAD_BACKFILL, DEFAULT_MATCH_THRESHOLD_PERCENT, DEFAULT_SAMPLE_SIZE,
        InferenceSettings,
    },
    retry::RetryPolicy,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub sample_size: usize,
    pub head_backfill: usize,
    pub match_threshold_percent: usize,
    pub choice_cardinality_percent: usize,
    pub choice_max_distinct: usize,
    pub choice_limit: usize,
    pub creation_retry: RetryPolicy,
    pub visibility_retry: RetryPolicy,
    pub skip_in_file_duplicates: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        let inference = InferenceSettings::default();
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
            head_backfill: DEFAULT_HEAD_BACKFILL,
            match_threshold_percent: DEFAULT_MATCH_THRESHOLD_PERCENT,
            choice_cardinality_percent: inference.choice_cardinality_percent,
            choice_max_distinct: inference.choice_max_distinct,
            choice_limit: DEFAULT_CHOICE_LIMIT,
            creation_retry: RetryPolicy::field_creation(),
            visibility_retry: RetryPolicy::schema_visibility(),
            skip_in_file_duplicates: false,
        }
    }
}

impl ImportOptions {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let options: ImportOptions = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        options
            .ensure_valid()
            .with_context(|| format!("Validating config file {path:?}"))?;
        Ok(options)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let options: ImportOptions = serde_yaml::from_str(raw).context("Parsing import options")?;
        options.ensure_valid()?;
        Ok(options)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.sample_size > 0, "sample_size must be positive");
        ensure!(
            (1..=100).contains(&self.match_threshold_percent),
            "match_threshold_percent must be between 1 and 100 (got {})",
            self.match_threshold_percent
        );
        ensure!(
            (1..=100).contains(&self.choice_cardinality_percent),
            "choice_cardinality_percent must be between 1 and 100 (got {})",
            self.choice_cardinality_percent
        );
        ensure!(self.choice_limit > 0, "choice_limit must be positive");
        self.creation_retry.ensure_valid("creation_retry")?;
        self.visibility_retry.ensure_valid("visibility_retry")?;
        Ok(())
    }

    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            match_threshold_percent: self.match_threshold_percent,
            choice_cardinality_percent: self.choice_cardinality_percent,
            choice_max_distinct: self.choice_max_distinct,
            ..InferenceSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_keys_take_defaults() {
        let options = ImportOptions::from_yaml_str("batch_size: 250\n").unwrap();
        assert_eq!(options.batch_size, 250);
        assert_eq!(options.sample_size, DEFAULT_SAMPLE_SIZE);
        assert_eq!(options.visibility_retry.max_attempts, 10);
        assert!(!options.skip_in_file_duplicates);
    }

    #[test]
    fn nested_retry_policies_merge_with_defaults() {
        let options = ImportOptions::from_yaml_str(
            "visibility_retry:\n  max_attempts: 3\n  base_delay_ms: 5\n",
        )
        .unwrap();
        assert_eq!(options.visibility_retry.max_attempts, 3);
        assert_eq!(options.visibility_retry.base_delay_ms, 5);
        assert_eq!(options.visibility_retry.max_delay_ms, 3_000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ImportOptions::from_yaml_str("batch_size: 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
        assert!(ImportOptions::from_yaml_str("match_threshold_percent: 0\n").is_err());
    }

    #[test]
    fn load_reads_yaml_from_disk() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "choice_limit: 20").unwrap();
        writeln!(file, "skip_in_file_duplicates: true").unwrap();
        let options = ImportOptions::load(file.path()).expect("load options");
        assert_eq!(options.choice_limit, 20);
        assert!(options.skip_in_file_duplicates);
        assert_eq!(options.inference_settings().match_threshold_percent, 40);
    }

    #[test]
    fn load_names_missing_file() {
        let err = ImportOptions::load(Path::new("no_such_import_config.yml")).unwrap_err();
        assert!(err.to_string().contains("no_such_import_config.yml"));
    }
}
