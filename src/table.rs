use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

const HEADER_SCAN_LIMIT: usize = 10;
const PROBE_HEADER: &str = "ID_REF";
const VALUE_HEADER: &str = "VALUE";
const TRAILING_FOOTER_LINES: usize = 2;

/// Per-probe measurements of one sample. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeColumn {
    pub name: String,
    pub values: IndexMap<String, Option<f32>>,
}

impl ProbeColumn {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, probe: &str) -> Option<f32> {
        self.values.get(probe).copied().flatten()
    }

    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

/// A probe-indexed table with one column per sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeTable {
    pub probes: Vec<String>,
    pub columns: IndexMap<String, Vec<Option<f32>>>,
}

impl ProbeTable {
    /// Reads a CSV whose first column is the probe index and whose header names the samples.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, KiraError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| KiraError::Parse(err.to_string()))?
            .clone();
        let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let mut table = ProbeTable {
            probes: Vec::new(),
            columns: names.iter().map(|name| (name.clone(), Vec::new())).collect(),
        };
        for record in reader.records() {
            let record = record.map_err(|err| KiraError::Parse(err.to_string()))?;
            let mut fields = record.iter();
            let Some(probe) = fields.next() else {
                continue;
            };
            table.probes.push(probe.to_string());
            for (name, raw) in names.iter().zip(fields) {
                if let Some(column) = table.columns.get_mut(name) {
                    column.push(parse_value(raw)?);
                }
            }
        }
        Ok(table)
    }

    pub fn from_path(path: &Path) -> Result<Self, KiraError> {
        let file = File::open(path)
            .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::read_csv(file)
    }

    pub fn from_columns<'a>(columns: impl IntoIterator<Item = &'a ProbeColumn>) -> Self {
        let columns: Vec<&ProbeColumn> = columns.into_iter().collect();
        let mut probes: IndexMap<String, ()> = IndexMap::new();
        for column in &columns {
            for probe in column.values.keys() {
                probes.entry(probe.clone()).or_default();
            }
        }
        let probes: Vec<String> = probes.into_keys().collect();
        let columns = columns
            .into_iter()
            .map(|column| {
                let values = probes.iter().map(|probe| column.get(probe)).collect();
                (column.name.clone(), values)
            })
            .collect();
        ProbeTable { probes, columns }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<ProbeColumn> {
        let values = self.columns.get(name)?;
        Some(ProbeColumn {
            name: name.to_string(),
            values: self
                .probes
                .iter()
                .cloned()
                .zip(values.iter().copied())
                .collect(),
        })
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut header = vec!["probe"];
        header.extend(self.column_names());
        writer
            .write_record(&header)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for (row, probe) in self.probes.iter().enumerate() {
            let mut record = vec![probe.clone()];
            for values in self.columns.values() {
                record.push(
                    values
                        .get(row)
                        .copied()
                        .flatten()
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                );
            }
            writer
                .write_record(&record)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

/// Parses the inline table of a `view=data` page into a column named `sample_id`.
///
/// The header line must contain `ID_REF` and `VALUE` within the first ten lines; the
/// last two lines of the page are footer.
pub fn parse_inline_table(text: &str, sample_id: &str) -> Result<ProbeColumn, KiraError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines
        .iter()
        .take(HEADER_SCAN_LIMIT)
        .position(|line| line.contains(PROBE_HEADER) && line.contains(VALUE_HEADER))
        .ok_or_else(|| {
            KiraError::Parse(format!(
                "data table header not found in first {HEADER_SCAN_LIMIT} lines for {sample_id}"
            ))
        })?;
    let end = lines.len().saturating_sub(TRAILING_FOOTER_LINES);
    if end <= start {
        return Err(KiraError::Parse(format!(
            "data table for {sample_id} has no body"
        )));
    }
    let body = lines[start..end].join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| KiraError::Parse(err.to_string()))?
        .clone();
    let probe_idx = header_index(&headers, PROBE_HEADER, sample_id)?;
    let value_idx = header_index(&headers, VALUE_HEADER, sample_id)?;

    let mut values = IndexMap::new();
    for record in reader.records() {
        let record = record.map_err(|err| KiraError::Parse(err.to_string()))?;
        let Some(probe) = record.get(probe_idx).filter(|probe| !probe.is_empty()) else {
            continue;
        };
        let value = match record.get(value_idx) {
            Some(raw) => parse_value(raw)?,
            None => None,
        };
        values.insert(probe.to_string(), value);
    }
    Ok(ProbeColumn {
        name: sample_id.to_string(),
        values,
    })
}

fn header_index(headers: &csv::StringRecord, name: &str, sample_id: &str) -> Result<usize, KiraError> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .ok_or_else(|| KiraError::Parse(format!("column {name} missing in data table for {sample_id}")))
}

/// Reads one measurement cell. Blank, `NA`, `null` and non-finite cells are missing values;
/// anything else that is not a number is a parse error.
pub fn parse_value(raw: &str) -> Result<Option<f32>, KiraError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    let value = trimmed
        .parse::<f32>()
        .map_err(|_| KiraError::Parse(format!("not a numeric value: {trimmed:?}")))?;
    Ok(Some(value).filter(|value| value.is_finite()))
}
