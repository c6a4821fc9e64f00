//! Field model shared by the reconciler, the coercion step, and the
//! service traits.
//!
//! [`FieldKind`] is the closed set of semantic kinds a table column can
//! carry, [`SchemaField`] is a column as the schema service reports it,
//! and [`FieldDraft`] is a column the reconciler intends to create.
//!
//! Field names coming from the schema service are already sanitized,
//! while column names from a source file are not, so name comparison
//! goes through [`names_match`], which checks both raw and sanitized
//! forms on both sides.

use std::{borrow::Cow, fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

const RESERVED_FIELD_NAMES: &[&str] = &[
    "created_at",
    "false",
    "from",
    "group",
    "id",
    "limit",
    "null",
    "offset",
    "order",
    "select",
    "table",
    "table_id",
    "true",
    "updated_at",
    "user",
    "where",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    LongText,
    Number,
    Percent,
    Currency,
    Checkbox,
    Date,
    Email,
    Url,
    Json,
    SingleChoice,
    MultiChoice,
    LinkToTable,
    Lookup,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::LongText => "longText",
            FieldKind::Number => "number",
            FieldKind::Percent => "percent",
            FieldKind::Currency => "currency",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Email => "email",
            FieldKind::Url => "url",
            FieldKind::Json => "json",
            FieldKind::SingleChoice => "singleChoice",
            FieldKind::MultiChoice => "multiChoice",
            FieldKind::LinkToTable => "linkToTable",
            FieldKind::Lookup => "lookup",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "text",
            "longText",
            "number",
            "percent",
            "currency",
            "checkbox",
            "date",
            "email",
            "url",
            "json",
            "singleChoice",
            "multiChoice",
            "linkToTable",
            "lookup",
        ]
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Number | FieldKind::Percent | FieldKind::Currency
        )
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, FieldKind::SingleChoice | FieldKind::MultiChoice)
    }

    /// Lookup fields are derived from other tables and are never created
    /// or written by an import.
    pub fn is_creatable(&self) -> bool {
        !matches!(self, FieldKind::Lookup)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "text" | "string" => Ok(FieldKind::Text),
            "longtext" | "textarea" => Ok(FieldKind::LongText),
            "number" | "integer" | "float" | "decimal" => Ok(FieldKind::Number),
            "percent" | "percentage" => Ok(FieldKind::Percent),
            "currency" | "money" => Ok(FieldKind::Currency),
            "checkbox" | "boolean" | "bool" => Ok(FieldKind::Checkbox),
            "date" => Ok(FieldKind::Date),
            "email" => Ok(FieldKind::Email),
            "url" | "link" => Ok(FieldKind::Url),
            "json" => Ok(FieldKind::Json),
            "singlechoice" | "singleselect" | "select" => Ok(FieldKind::SingleChoice),
            "multichoice" | "multiselect" | "tags" => Ok(FieldKind::MultiChoice),
            "linktotable" | "linkedrecord" | "relation" => Ok(FieldKind::LinkToTable),
            "lookup" => Ok(FieldKind::Lookup),
            _ => Err(anyhow!(
                "Unknown field kind '{value}'. Supported kinds: {}",
                FieldKind::variants().join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FieldOptions {
    #[default]
    None,
    Choices {
        choices: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Link {
        linked_table_id: String,
    },
}

impl FieldOptions {
    pub fn choices(&self) -> &[String] {
        match self {
            FieldOptions::Choices { choices } => choices,
            _ => &[],
        }
    }

    pub fn linked_table_id(&self) -> Option<&str> {
        match self {
            FieldOptions::Link { linked_table_id } => Some(linked_table_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub options: FieldOptions,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: FieldOptions::None,
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDraft {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub options: FieldOptions,
}

impl FieldDraft {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: FieldOptions::None,
        }
    }

    pub fn into_field(self) -> SchemaField {
        SchemaField {
            name: self.name,
            kind: self.kind,
            options: self.options,
        }
    }
}

pub fn collapse_whitespace(value: &str) -> Cow<'_, str> {
    let trimmed = value.trim();
    let needs_work = trimmed
        .as_bytes()
        .windows(2)
        .any(|pair| pair[0].is_ascii_whitespace() && pair[1].is_ascii_whitespace())
        || trimmed.chars().any(|c| c.is_whitespace() && c != ' ');
    if needs_work {
        Cow::Owned(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
    } else {
        Cow::Borrowed(trimmed)
    }
}

pub fn column_key(name: &str) -> Cow<'_, str> {
    collapse_whitespace(name.trim_start_matches('\u{feff}'))
}

pub fn sanitize_field_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_separator = false;
    for ch in collapse_whitespace(name).chars() {
        match ch {
            'a'..='z' | '0'..='9' => {
                sanitized.push(ch);
                last_was_separator = false;
            }
            'A'..='Z' => {
                sanitized.push(ch.to_ascii_lowercase());
                last_was_separator = false;
            }
            _ => {
                if !last_was_separator {
                    sanitized.push('_');
                    last_was_separator = true;
                }
            }
        }
    }
    let trimmed = sanitized.trim_matches('_');
    let mut result = if trimmed.is_empty() {
        "field".to_string()
    } else {
        trimmed.to_string()
    };
    if result.starts_with(|c: char| c.is_ascii_digit()) {
        result = format!("field_{result}");
    }
    if RESERVED_FIELD_NAMES.contains(&result.as_str()) {
        result.push_str("_field");
    }
    result
}

pub fn names_match(column_name: &str, field_name: &str) -> bool {
    let column_raw = column_key(column_name).to_lowercase();
    let field_raw = column_key(field_name).to_lowercase();
    if column_raw == field_raw {
        return true;
    }
    let column_sanitized = sanitize_field_name(column_name);
    let field_sanitized = sanitize_field_name(field_name);
    column_sanitized == field_raw
        || column_raw == field_sanitized
        || column_sanitized == field_sanitized
}

pub fn unique_field_name<F>(base: &str, mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    if !is_taken(base) {
        return base.to_string();
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
