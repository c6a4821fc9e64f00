//! Choice-domain extraction for single- and multi-choice fields.

use std::collections::BTreeSet;

use crate::schema::FieldKind;

pub const DEFAULT_CHOICE_LIMIT: usize = 100;

pub fn split_choice_tokens(value: &str) -> impl Iterator<Item = &str> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn extract_choices<'a, I>(values: I, kind: FieldKind, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut domain = BTreeSet::new();
    for value in values.into_iter().flatten() {
        match kind {
            FieldKind::MultiChoice => {
                domain.extend(split_choice_tokens(value));
            }
            FieldKind::SingleChoice => {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    domain.insert(trimmed);
                }
            }
            _ => return Vec::new(),
        }
    }
    domain
        .into_iter()
        .take(limit)
        .map(str::to_string)
        .collect()
}
