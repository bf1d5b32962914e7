use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::domain::DataStatus;
use crate::error::KiraError;
use crate::soft::{self, InfoValue, Record, SeriesInfo};
use crate::table::{ProbeColumn, ProbeTable};

pub const SAMPLE_ID_COLUMN: &str = "^SAMPLE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum SampleData {
    Unset,
    Table(ProbeColumn),
    /// Metadata-only shell; data is attached later or never.
    InfoOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    InfoFetched,
    InfoOnly,
    DataPopulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntity {
    pub id: String,
    pub platform_id: String,
    pub series_id: String,
    pub info: Record,
    pub characteristics: IndexMap<String, String>,
    pub data: SampleData,
    pub data_status: DataStatus,
}

impl SampleEntity {
    pub fn from_record(id: &str, info: Record, data_status: DataStatus) -> Self {
        let field = |name: &str| info.get(name).cloned().unwrap_or_default();
        let characteristics = info
            .get("characteristics_ch1")
            .map(|section| soft::parse_characteristics(section))
            .unwrap_or_default();
        Self {
            id: id.to_string(),
            platform_id: field("platform_id"),
            series_id: field("series_id"),
            characteristics,
            info,
            data: SampleData::Unset,
            data_status,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.info.get("title").map(String::as_str)
    }

    pub fn state(&self) -> SampleState {
        match self.data {
            SampleData::Unset => SampleState::InfoFetched,
            SampleData::InfoOnly => SampleState::InfoOnly,
            SampleData::Table(_) => SampleState::DataPopulated,
        }
    }

    /// Attaches a data column, renaming it to this sample's accession.
    pub fn attach(&mut self, column: ProbeColumn) {
        self.data = SampleData::Table(column.renamed(&self.id));
    }

    pub fn data_column(&self) -> Option<&ProbeColumn> {
        match &self.data {
            SampleData::Table(column) => Some(column),
            _ => None,
        }
    }
}

/// Why a member sample ended up without an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unresolved {
    /// Quarantined: the card publishes no usable data.
    NoData,
    /// Every attempt failed with a transient error.
    Exhausted {
        attempts: u32,
        kind: String,
        message: String,
    },
}

impl std::fmt::Display for Unresolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unresolved::NoData => f.write_str("no data available"),
            Unresolved::Exhausted {
                attempts,
                kind,
                message,
            } => write!(f, "{kind} after {attempts} attempts: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesState {
    Created,
    InfoExtracted,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntity {
    pub id: String,
    pub info: SeriesInfo,
    pub members: Vec<String>,
    pub samples: BTreeMap<String, SampleEntity>,
    pub unresolved: BTreeMap<String, Unresolved>,
}

impl SeriesEntity {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            info: SeriesInfo::new(),
            members: Vec::new(),
            samples: BTreeMap::new(),
            unresolved: BTreeMap::new(),
        }
    }

    /// Builds the series skeleton from its SOFT text: metadata and member list, no samples yet.
    pub fn from_soft(id: &str, text: &str) -> Self {
        let mut members = Vec::new();
        let mut seen = BTreeSet::new();
        for member in soft::series_member_ids(text) {
            if seen.insert(member.clone()) {
                members.push(member);
            }
        }
        Self {
            id: id.to_string(),
            info: soft::parse_series_info(text),
            members,
            samples: BTreeMap::new(),
            unresolved: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SeriesState {
        if self.info.is_empty() && self.members.is_empty() {
            SeriesState::Created
        } else if self.samples.is_empty() && self.unresolved.is_empty() {
            SeriesState::InfoExtracted
        } else {
            SeriesState::Populated
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample(&self, id: &str) -> Result<&SampleEntity, KiraError> {
        self.samples
            .get(id)
            .ok_or_else(|| KiraError::SampleNotFound {
                series: self.id.clone(),
                sample: id.to_string(),
            })
    }

    /// Every member is either a sample or unresolved, never both.
    pub fn is_partitioned(&self) -> bool {
        let resolved: BTreeSet<&str> = self
            .samples
            .keys()
            .chain(self.unresolved.keys())
            .map(String::as_str)
            .collect();
        let members: BTreeSet<&str> = self.members.iter().map(String::as_str).collect();
        let disjoint = self
            .samples
            .keys()
            .all(|id| !self.unresolved.contains_key(id));
        disjoint && resolved == members
    }

    pub fn info_value(&self, key: &str) -> Option<&InfoValue> {
        self.info.get(key)
    }

    pub fn title(&self) -> Option<&str> {
        self.info_value("title").and_then(InfoValue::first)
    }

    pub fn platform_id(&self) -> Option<&str> {
        self.info_value("platform_id").and_then(InfoValue::first)
    }

    pub fn supplementary_files(&self) -> Vec<&str> {
        self.info_value("supplementary_file")
            .map(InfoValue::values)
            .unwrap_or_default()
    }

    pub fn array_type(&self, array_types: &BTreeMap<String, String>) -> Result<String, KiraError> {
        let platform = self
            .platform_id()
            .ok_or_else(|| KiraError::UnknownPlatform(format!("{} (no platform_id)", self.id)))?;
        array_types
            .get(platform)
            .cloned()
            .ok_or_else(|| KiraError::UnknownPlatform(platform.to_string()))
    }

    /// Merges every attached sample column into one table.
    pub fn data_table(&self) -> ProbeTable {
        ProbeTable::from_columns(self.samples.values().filter_map(SampleEntity::data_column))
    }

    pub fn info_table(&self) -> InfoTable {
        InfoTable::from_records(self.samples.values().map(|sample| &sample.info))
    }
}

/// Flattened sample metadata: one row per sample, one column per info field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InfoTable {
    pub fields: Vec<String>,
    pub rows: Vec<Record>,
}

impl InfoTable {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let rows: Vec<Record> = records.into_iter().cloned().collect();
        let mut fields: Vec<String> = vec![SAMPLE_ID_COLUMN.to_string()];
        for row in &rows {
            for key in row.keys() {
                if !fields.contains(key) {
                    fields.push(key.clone());
                }
            }
        }
        Self { fields, rows }
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|row| row.get(SAMPLE_ID_COLUMN).map(String::as_str))
            .collect()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), KiraError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer
            .write_record(&self.fields)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            let record: Vec<&str> = self
                .fields
                .iter()
                .map(|field| row.get(field).map(String::as_str).unwrap_or(""))
                .collect();
            writer
                .write_record(&record)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Reads a table written by [`InfoTable::write_csv`]; empty cells are treated as absent.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, KiraError> {
        let mut reader = csv::Reader::from_reader(reader);
        let fields: Vec<String> = reader
            .headers()
            .map_err(|err| KiraError::Parse(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| KiraError::Parse(err.to_string()))?;
            let row: Record = fields
                .iter()
                .zip(record.iter())
                .filter(|(_, value)| !value.is_empty())
                .map(|(field, value)| (field.clone(), value.to_string()))
                .collect();
            rows.push(row);
        }
        Ok(Self { fields, rows })
    }
}
