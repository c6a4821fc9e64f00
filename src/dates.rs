//! Date recognition for inference and date parsing for coercion.
//!
//! Numeric dates are ambiguous, so [`parse_import_date`] resolves them in a
//! fixed order: `dd/mm/yyyy`, then `yyyy-mm-dd`, then `mm/dd/yyyy` (only
//! when the first token can be a month), then ISO date-times, then textual
//! month names, and finally a handful of generic formats that are only
//! accepted for date-shaped input with a year in [`MIN_YEAR`, `MAX_YEAR`].

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

static DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4}|\d{2})$").expect("valid day-first regex")
});
static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})$").expect("valid year-first regex")
});
static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?)(?:Z|[+-]\d{2}:?\d{2})?$")
        .expect("valid iso datetime regex")
});
static MONTH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(\d{1,2}(st|nd|rd|th)?[\s\-]+)?(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?([\s\-]+\d{1,2}(st|nd|rd|th)?)?,?[\s\-]+\d{4}$",
    )
    .expect("valid month-name regex")
});
static ORDINAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d)(st|nd|rd|th)\b").expect("valid ordinal regex"));
static BOUNDED_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\b").expect("valid year regex"));

// Applied to the date-time without its offset; the date is kept as written.
const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const MONTH_NAME_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y"];

const GENERIC_FORMATS: &[&str] = &["%a %d %b %Y", "%A %d %B %Y", "%a %b %d %Y", "%A %B %d %Y"];

/// Whether a value looks like a date to the inference engine. Only values
/// that [`parse_import_date`] can turn into a date qualify.
pub fn looks_like_date(value: &str) -> bool {
    parse_import_date(value).is_some()
}

/// Parses a source value into a calendar date, or `None` when no supported
/// form applies or the year falls outside [`MIN_YEAR`, `MAX_YEAR`].
pub fn parse_import_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_any(trimmed).filter(|date| year_in_bounds(date.year()))
}

fn parse_any(value: &str) -> Option<NaiveDate> {
    if let Some(caps) = DAY_FIRST.captures(value) {
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[2].parse().ok()?;
        let year = expand_year(&caps[3])?;
        return NaiveDate::from_ymd_opt(year, second, first).or_else(|| {
            (first <= 12)
                .then(|| NaiveDate::from_ymd_opt(year, first, second))
                .flatten()
        });
    }

    if let Some(caps) = YEAR_FIRST.captures(value) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = ISO_DATETIME.captures(value) {
        let local = &caps[1];
        return ISO_DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())
            .map(|parsed| parsed.date());
    }

    if MONTH_NAME.is_match(value) {
        return parse_month_name(value);
    }

    parse_generic(value)
}

fn parse_month_name(value: &str) -> Option<NaiveDate> {
    let normalized = normalize_month_text(value);
    // Month and year only: the first of that month.
    let text = if normalized.split(' ').count() == 2 {
        format!("1 {normalized}")
    } else {
        normalized
    };
    MONTH_NAME_FORMATS
        .iter()
        .filter_map(|format| NaiveDate::parse_from_str(&text, format).ok())
        .find(|date| year_in_bounds(date.year()))
}

fn parse_generic(value: &str) -> Option<NaiveDate> {
    if !is_date_shaped(value) {
        return None;
    }
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            let normalized = normalize_month_text(value);
            GENERIC_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
        })
}

fn is_date_shaped(value: &str) -> bool {
    value.len() <= 40
        && value.chars().any(|c| c.is_ascii_digit())
        && value.chars().any(|c| c.is_ascii_alphabetic())
        && BOUNDED_YEAR
            .find_iter(value)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .any(year_in_bounds)
}

fn normalize_month_text(value: &str) -> String {
    let without_ordinals = ORDINAL_SUFFIX.replace_all(value, "$1");
    without_ordinals
        .replace([',', '.', '-'], " ")
        .split_whitespace()
        .map(|token| {
            if token.eq_ignore_ascii_case("sept") {
                "Sep"
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_year(token: &str) -> Option<i32> {
    let year: i32 = token.parse().ok()?;
    if token.len() == 2 {
        Some(if year < 70 { 2000 + year } else { 1900 + year })
    } else {
        Some(year)
    }
}

fn year_in_bounds(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}
