//! Type inference: classifies a column into a [`FieldKind`] from sampled
//! values.
//!
//! Samples are drawn evenly across the whole column, so a file that starts
//! with a block of blank cells still gets a representative sample, and the
//! first non-empty values are always included.
//!
//! Each candidate kind counts how many non-empty samples match its pattern.
//! Kinds are then tested in a fixed priority order (JSON, email, URL,
//! checkbox, choice, date, number, text) and the first kind whose match count
//! reaches the threshold wins. Low-cardinality columns are tested as choices
//! before dates and numbers, so a column of repeated status codes becomes a
//! choice field rather than a measurement.

use std::{
    collections::{BTreeSet, HashMap},
    sync::LazyLock,
};

use itertools::Itertools;
use regex::Regex;

use crate::{
    dates::looks_like_date,
    parser::ColumnRef,
    schema::FieldKind,
    value::{has_currency_marker, is_plain_number},
};

pub const DEFAULT_SAMPLE_SIZE: usize = 200;
pub const DEFAULT_HEAD_BACKFILL: usize = 20;
pub const DEFAULT_MATCH_THRESHOLD_PERCENT: usize = 40;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});
static URL_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z][a-z0-9+.\-]*://\S+$").expect("valid url scheme regex")
});
static URL_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z0-9]([a-z0-9\-]*[a-z0-9])?\.)+[a-z]{2,24}(:\d{1,5})?(/\S*)?$")
        .expect("valid url domain regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceSettings {
    pub match_threshold_percent: usize,
    pub choice_min_samples: usize,
    pub choice_cardinality_percent: usize,
    pub choice_max_distinct: usize,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            match_threshold_percent: DEFAULT_MATCH_THRESHOLD_PERCENT,
            choice_min_samples: 3,
            choice_cardinality_percent: 50,
            choice_max_distinct: 15,
        }
    }
}

impl InferenceSettings {
    /// Smallest match count that satisfies the threshold for `total`
    /// samples, rounding down but never below one.
    pub fn required_matches(&self, total: usize) -> usize {
        (total * self.match_threshold_percent / 100).max(1)
    }

    fn meets_threshold(&self, matches: usize, total: usize) -> bool {
        total > 0 && matches >= self.required_matches(total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInference {
    pub name: String,
    pub kind: FieldKind,
    pub sampled: usize,
    pub distinct: usize,
    pub example: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct KindTally {
    total: usize,
    json: usize,
    email: usize,
    url: usize,
    checkbox: usize,
    delimited: usize,
    date: usize,
    number: usize,
    percent_hits: usize,
    currency_hits: usize,
    frequencies: HashMap<String, usize>,
}

impl KindTally {
    fn observe(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        self.total += 1;
        *self
            .frequencies
            .entry(trimmed.to_lowercase())
            .or_insert(0) += 1;

        if is_json_document(trimmed) {
            self.json += 1;
        }
        if EMAIL.is_match(trimmed) {
            self.email += 1;
        }
        if is_url(trimmed) {
            self.url += 1;
        }
        if matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "true" | "false" | "yes" | "no" | "1" | "0" | "y" | "n" | "t" | "f"
        ) {
            self.checkbox += 1;
        }
        if trimmed.contains([',', ';']) {
            self.delimited += 1;
        }
        if looks_like_date(trimmed) {
            self.date += 1;
        }
        if is_plain_number(trimmed) {
            self.number += 1;
        }
        if trimmed.contains('%') {
            self.percent_hits += 1;
        }
        if has_currency_marker(trimmed) {
            self.currency_hits += 1;
        }
    }

    fn decide(&self, settings: &InferenceSettings) -> FieldKind {
        let total = self.total;
        if total == 0 {
            return FieldKind::Text;
        }
        let accepts = |matches: usize| settings.meets_threshold(matches, total);

        if accepts(self.json) {
            return FieldKind::Json;
        }
        if accepts(self.email) {
            return FieldKind::Email;
        }
        if accepts(self.url) {
            return FieldKind::Url;
        }
        if accepts(self.checkbox) {
            return FieldKind::Checkbox;
        }
        if let Some(kind) = self.choice_kind(settings) {
            return kind;
        }
        if accepts(self.date) {
            return FieldKind::Date;
        }
        if accepts(self.number) {
            return if accepts(self.percent_hits) {
                FieldKind::Percent
            } else if accepts(self.currency_hits) {
                FieldKind::Currency
            } else {
                FieldKind::Number
            };
        }
        FieldKind::Text
    }

    fn choice_kind(&self, settings: &InferenceSettings) -> Option<FieldKind> {
        let total = self.total;
        if total < settings.choice_min_samples {
            return None;
        }
        let distinct = self.frequencies.len();
        let low_cardinality = distinct * 100 <= total * settings.choice_cardinality_percent
            || distinct <= settings.choice_max_distinct;
        if !low_cardinality {
            return None;
        }
        if settings.meets_threshold(self.delimited, total) {
            return Some(FieldKind::MultiChoice);
        }
        let most_frequent = self.frequencies.values().copied().max().unwrap_or(0);
        (most_frequent >= 2).then_some(FieldKind::SingleChoice)
    }
}

fn is_json_document(value: &str) -> bool {
    (value.starts_with('{') || value.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(value).is_ok()
}

fn is_url(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    if URL_SCHEME.is_match(value) {
        return true;
    }
    if value
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("www."))
        && value.len() > 4
    {
        return true;
    }
    if URL_DOMAIN.is_match(value) {
        return true;
    }
    value.contains('.') && value.contains('/')
}

pub fn infer<S: AsRef<str>>(samples: &[S]) -> FieldKind {
    infer_with(samples, &InferenceSettings::default())
}

pub fn infer_with<S: AsRef<str>>(samples: &[S], settings: &InferenceSettings) -> FieldKind {
    let mut tally = KindTally::default();
    for sample in samples {
        tally.observe(sample.as_ref());
    }
    tally.decide(settings)
}

pub fn sample_column<'a>(
    column: &ColumnRef<'a>,
    sample_size: usize,
    head_backfill: usize,
) -> Vec<&'a str> {
    let rows = column.len();
    if rows == 0 || sample_size == 0 {
        return Vec::new();
    }
    let stride = (rows / sample_size).max(1);
    let mut picked = BTreeSet::new();
    for row in (0..rows).step_by(stride) {
        if picked.len() >= sample_size {
            break;
        }
        if column.value(row).is_some_and(|v| !v.trim().is_empty()) {
            picked.insert(row);
        }
    }
    let head = (0..rows)
        .filter(|row| column.value(*row).is_some_and(|v| !v.trim().is_empty()))
        .take(head_backfill);
    picked.extend(head);
    picked
        .into_iter()
        .filter_map(|row| column.value(row))
        .collect()
}

pub fn infer_column(
    column: &ColumnRef<'_>,
    sample_size: usize,
    head_backfill: usize,
    settings: &InferenceSettings,
) -> ColumnInference {
    let samples = sample_column(column, sample_size, head_backfill);
    let kind = infer_with(&samples, settings);
    let distinct = samples
        .iter()
        .map(|s| s.trim().to_lowercase())
        .unique()
        .count();
    ColumnInference {
        name: column.name.to_string(),
        kind,
        sampled: samples.len(),
        distinct,
        example: samples.first().map(|s| s.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedTable;

    fn kind_of(values: &[&str]) -> FieldKind {
        infer(values)
    }

    #[test]
    fn empty_samples_default_to_text() {
        assert_eq!(kind_of(&[]), FieldKind::Text);
        assert_eq!(kind_of(&["", "  "]), FieldKind::Text);
    }

    #[test]
    fn status_column_is_single_choice() {
        assert_eq!(
            kind_of(&["Open", "Open", "Closed", "Open"]),
            FieldKind::SingleChoice
        );
    }

    #[test]
    fn percent_values_are_percent() {
        assert_eq!(kind_of(&["10%", "25%", "5%"]), FieldKind::Percent);
    }

    #[test]
    fn currency_values_are_currency() {
        assert_eq!(
            kind_of(&["$10.00", "$25.50", "$5.25", "$99.99"]),
            FieldKind::Currency
        );
        assert_eq!(kind_of(&["12 USD", "40 USD", "7 EUR"]), FieldKind::Currency);
    }

    #[test]
    fn distinct_numbers_are_numbers() {
        assert_eq!(kind_of(&["1.5", "22", "-3.25", "4000"]), FieldKind::Number);
    }

    #[test]
    fn distinct_dates_are_dates() {
        assert_eq!(
            kind_of(&["2024-01-01", "2024-02-11", "2024-03-15", "2024-04-20"]),
            FieldKind::Date
        );
    }

    #[test]
    fn structured_patterns_take_priority() {
        assert_eq!(
            kind_of(&[r#"{"a":1}"#, r#"[1,2]"#, r#"{"b":2}"#]),
            FieldKind::Json
        );
        assert_eq!(
            kind_of(&["a@example.com", "b@example.org", "c@example.net"]),
            FieldKind::Email
        );
        assert_eq!(
            kind_of(&["https://a.dev", "www.b.com", "c.io/path"]),
            FieldKind::Url
        );
        assert_eq!(kind_of(&["yes", "no", "yes", "no"]), FieldKind::Checkbox);
    }

    #[test]
    fn delimited_low_cardinality_values_are_multi_choice() {
        assert_eq!(
            kind_of(&["red, blue", "blue", "red;green", "red, blue"]),
            FieldKind::MultiChoice
        );
    }

    #[test]
    fn repeated_numeric_codes_are_classified_as_choices() {
        assert_eq!(kind_of(&["1", "2", "2", "3", "3"]), FieldKind::SingleChoice);
    }

    #[test]
    fn unique_free_text_is_text() {
        assert_eq!(
            kind_of(&["alpha beta", "gamma delta", "epsilon zeta"]),
            FieldKind::Text
        );
    }

    #[test]
    fn threshold_accepts_at_forty_percent_and_rejects_below() {
        let mut at_threshold = vec!["x@example.com"; 4];
        at_threshold.extend([
            "alpha one",
            "beta two",
            "gamma three",
            "delta four",
            "epsilon five",
            "zeta six",
        ]);
        assert_eq!(kind_of(&at_threshold), FieldKind::Email);

        let mut below = vec!["x@example.com"; 3];
        below.extend([
            "alpha one",
            "beta two",
            "gamma three",
            "delta four",
            "epsilon five",
            "zeta six",
            "eta seven",
        ]);
        assert_ne!(kind_of(&below), FieldKind::Email);
    }

    #[test]
    fn required_matches_rounds_down_with_floor_of_one() {
        let settings = InferenceSettings::default();
        assert_eq!(settings.required_matches(100), 40);
        assert_eq!(settings.required_matches(99), 39);
        assert_eq!(settings.required_matches(5), 2);
        assert_eq!(settings.required_matches(1), 1);
    }

    #[test]
    fn sampling_strides_across_the_column_and_backfills_the_head() {
        let rows = (0..1000)
            .map(|i| {
                let cell = if i < 300 { None } else { Some(format!("v{i}")) };
                vec![Some(i.to_string()), cell]
            })
            .collect();
        let table =
            ParsedTable::new(vec!["id".to_string(), "value".to_string()], rows).unwrap();
        let column = table.column(1).unwrap();
        let samples = sample_column(&column, 200, 20);
        assert!(samples.len() >= 100);
        assert!(samples.len() <= 220);
        assert!(samples.contains(&"v995"), "stride should reach the tail");
        assert!(samples.contains(&"v301"), "head backfill should include early values");
    }

    #[test]
    fn small_columns_sample_every_value() {
        let rows = vec![
            vec![Some("a".to_string())],
            vec![None],
            vec![Some("b".to_string())],
        ];
        let table = ParsedTable::new(vec!["c".to_string()], rows).unwrap();
        let column = table.column(0).unwrap();
        assert_eq!(sample_column(&column, 200, 20), vec!["a", "b"]);
        let inference = infer_column(&column, 200, 20, &InferenceSettings::default());
        assert_eq!(inference.sampled, 2);
        assert_eq!(inference.example.as_deref(), Some("a"));
    }
}
