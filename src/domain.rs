use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleAccession(String);

impl SampleAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !has_numeric_suffix(&normalized, "GSM") {
            return Err(KiraError::InvalidSampleAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesAccession(String);

impl SeriesAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SeriesAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !has_numeric_suffix(&normalized, "GSE") {
            return Err(KiraError::InvalidSeriesAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn has_numeric_suffix(value: &str, prefix: &str) -> bool {
    value
        .strip_prefix(prefix)
        .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
        .unwrap_or(false)
}

/// How measurement data for a sample is published on its GEO card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataStatus {
    OnPage,
    IdatPair,
    None,
}

impl fmt::Display for DataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataStatus::OnPage => write!(f, "on_page"),
            DataStatus::IdatPair => write!(f, "idat_pair"),
            DataStatus::None => write!(f, "none"),
        }
    }
}

/// A supplementary artifact chosen ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    Url(String),
    FileName(String),
    /// 1-based position in the series' supplementary file list.
    Index(usize),
}

impl FromStr for ArtifactRef {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(KiraError::ArtifactSelection(
                "empty artifact reference".to_string(),
            ));
        }
        if trimmed.contains("://") {
            return Ok(ArtifactRef::Url(trimmed.to_string()));
        }
        if let Ok(index) = trimmed.parse::<usize>() {
            return Ok(ArtifactRef::Index(index));
        }
        Ok(ArtifactRef::FileName(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationMode {
    PerSample,
    Supplementary(ArtifactRef),
}

impl PopulationMode {
    /// Parses a mode selector; `supplementary` requires an artifact reference.
    pub fn parse(selector: &str, artifact: Option<ArtifactRef>) -> Result<Self, KiraError> {
        match selector.trim().to_ascii_lowercase().as_str() {
            "per_sample" | "per-sample" | "per_gsm" => Ok(PopulationMode::PerSample),
            "supplementary" | "supp" => artifact.map(PopulationMode::Supplementary).ok_or_else(
                || KiraError::ArtifactSelection("supplementary mode needs an artifact".to_string()),
            ),
            other => Err(KiraError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Tabular,
    Archive(ArchiveFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArtifactKind {
    pub fn from_file_name(name: &str) -> Result<Self, KiraError> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".csv.gz") || lower.ends_with(".csv") {
            Ok(ArtifactKind::Tabular)
        } else if lower.ends_with(".tar") {
            Ok(ArtifactKind::Archive(ArchiveFormat::Tar))
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArtifactKind::Archive(ArchiveFormat::TarGz))
        } else if lower.ends_with(".zip") {
            Ok(ArtifactKind::Archive(ArchiveFormat::Zip))
        } else {
            Err(KiraError::UnsupportedArtifact(name.to_string()))
        }
    }
}

/// Last path segment of a URL or path.
pub fn file_name_of(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}
