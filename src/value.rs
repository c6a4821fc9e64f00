//! Typed cell values and per-kind coercion.
//!
//! Source cells only ever reach the row store through [`coerce_value`],
//! which turns a raw string into the [`CellValue`] variant matching the
//! target field's [`FieldKind`]. Empty cells are always [`CellValue::Null`].

use std::{collections::BTreeMap, fmt, sync::LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{choices::split_choice_tokens, dates::parse_import_date, schema::FieldKind};

pub(crate) const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

static CURRENCY_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(usd|eur|gbp|jpy|inr|cad|aud|chf|cny)\s*|\s*(usd|eur|gbp|jpy|inr|cad|aud|chf|cny)$")
        .expect("valid currency code regex")
});
static PLAIN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid number regex"));

pub type Record = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum CellValue {
    Null,
    Text(String),
    Number(f64),
    Checkbox(bool),
    Date(NaiveDate),
    Choices(Vec<String>),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            CellValue::Checkbox(b) => b.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Choices(values) => values.join(", "),
            CellValue::Json(value) => value.to_string(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub source_index: usize,
    pub values: Record,
}

impl CandidateRow {
    pub fn row_number(&self) -> usize {
        self.source_index + 1
    }

    pub fn value(&self, field: &str) -> Option<&CellValue> {
        self.values.get(field)
    }
}

pub fn coerce_value(raw: Option<&str>, kind: FieldKind) -> CellValue {
    let Some(trimmed) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return CellValue::Null;
    };
    match kind {
        FieldKind::Number | FieldKind::Percent | FieldKind::Currency => {
            CellValue::Number(parse_number(trimmed).unwrap_or(0.0))
        }
        FieldKind::Checkbox => CellValue::Checkbox(matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "true" | "1" | "yes"
        )),
        FieldKind::Date => parse_import_date(trimmed)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        FieldKind::MultiChoice => {
            let tokens = split_choice_tokens(trimmed)
                .map(str::to_string)
                .collect::<Vec<_>>();
            if tokens.is_empty() {
                CellValue::Null
            } else {
                CellValue::Choices(tokens)
            }
        }
        FieldKind::Json => serde_json::from_str(trimmed)
            .map(CellValue::Json)
            .unwrap_or_else(|_| CellValue::Text(trimmed.to_string())),
        FieldKind::Text
        | FieldKind::LongText
        | FieldKind::Email
        | FieldKind::Url
        | FieldKind::SingleChoice
        | FieldKind::LinkToTable
        | FieldKind::Lookup => CellValue::Text(trimmed.to_string()),
    }
}

pub(crate) fn strip_numeric_decorations(value: &str) -> String {
    let without_codes = CURRENCY_CODE.replace_all(value.trim(), "");
    without_codes
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '%' && !CURRENCY_SYMBOLS.contains(c))
        .collect()
}

pub(crate) fn is_plain_number(value: &str) -> bool {
    PLAIN_NUMBER.is_match(&strip_numeric_decorations(value))
}

pub(crate) fn has_currency_marker(value: &str) -> bool {
    value.contains(CURRENCY_SYMBOLS) || CURRENCY_CODE.is_match(value.trim())
}

fn parse_number(value: &str) -> Option<f64> {
    let stripped = strip_numeric_decorations(value);
    stripped.parse::<f64>().ok().filter(|f| f.is_finite())
}
