//! Parsing of GEO SOFT text (`!Prefix_field = value` lines).

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SAMPLE_PREFIX: &str = "!Sample_";
pub const SAMPLE_DELIMITER: &str = "^SAMPLE";
pub const SERIES_PREFIX: &str = "!Series_";
pub const SERIES_DELIMITER: &str = "^SERIES";

pub const SUPPLEMENTARY_FIELD: &str = "!Sample_supplementary_file";
pub const ROW_COUNT_FIELD: &str = "!Sample_data_row_count";

const MEMBER_FIELD: &str = "!Series_sample_id";

/// Field name to value, in first-seen order. Repeated fields are joined with `\n`.
pub type Record = IndexMap<String, String>;

/// Parses the lines of `text` carrying `prefix` (or the `delimiter` marker line).
///
/// Lines that do not split into exactly one key and one value on `=` are dropped.
pub fn parse_record(text: &str, prefix: &str, delimiter: &str) -> Record {
    let mut fields: IndexMap<String, Vec<String>> = IndexMap::new();
    for line in text.lines() {
        if !line.contains(prefix) && !line.contains(delimiter) {
            continue;
        }
        let line = line.replacen(prefix, "", 1);
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        fields
            .entry(key.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    fields
        .into_iter()
        .map(|(key, values)| (key, values.join("\n")))
        .collect()
}

pub fn parse_sample_record(text: &str) -> Record {
    parse_record(text, SAMPLE_PREFIX, SAMPLE_DELIMITER)
}

/// Member sample accessions listed by a series record, in listing order.
pub fn series_member_ids(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.contains(MEMBER_FIELD))
        .filter_map(|line| line.split_once('='))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Single(String),
    Multi(Vec<String>),
}

impl InfoValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            InfoValue::Single(value) => Some(value.as_str()),
            InfoValue::Multi(values) => values.first().map(String::as_str),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            InfoValue::Single(value) => vec![value.as_str()],
            InfoValue::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

pub type SeriesInfo = IndexMap<String, InfoValue>;

/// Series-level metadata without the member list; single values collapse to a bare string.
pub fn parse_series_info(text: &str) -> SeriesInfo {
    let mut aggregated: IndexMap<String, Vec<String>> = IndexMap::new();
    for line in text.lines() {
        if line.contains(MEMBER_FIELD) || line.trim().len() <= 1 {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.strip_prefix(SERIES_PREFIX).unwrap_or(key).trim();
        aggregated
            .entry(key.to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    aggregated
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                InfoValue::Single(values.remove(0))
            } else {
                InfoValue::Multi(values)
            };
            (key, value)
        })
        .collect()
}

/// Splits a `characteristics_ch1` section (`key: value` per line) into a mapping.
pub fn parse_characteristics(section: &str) -> IndexMap<String, String> {
    section
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

static SUPPLEMENTARY_VALUES: LazyLock<Regex> = LazyLock::new(|| field_regex(SUPPLEMENTARY_FIELD));
static ROW_COUNT_VALUES: LazyLock<Regex> = LazyLock::new(|| field_regex(ROW_COUNT_FIELD));

fn field_regex(field: &str) -> Regex {
    Regex::new(&format!(r"(?m)^\s*{}\s*=[ \t]*(.*?)\s*$", regex::escape(field))).unwrap()
}

/// Every non-empty value of `field` (e.g. `!Sample_supplementary_file`) in document order.
pub fn field_values(text: &str, field: &str) -> Vec<String> {
    match field {
        SUPPLEMENTARY_FIELD => captured_values(&SUPPLEMENTARY_VALUES, text),
        ROW_COUNT_FIELD => captured_values(&ROW_COUNT_VALUES, text),
        other => captured_values(&field_regex(other), text),
    }
}

fn captured_values(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
