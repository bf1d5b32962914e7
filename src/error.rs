use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid GEO sample accession: {0}")]
    InvalidSampleAccession(String),

    #[error("invalid GEO series accession: {0}")]
    InvalidSeriesAccession(String),

    #[error("invalid population mode: {0}")]
    InvalidMode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GEO request for {accession} failed: {message}")]
    NetworkFetch { accession: String, message: String },

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no data available on GEO card {0}")]
    NoDataAvailable(String),

    #[error("cache entry for {id} cannot be restored: {message}")]
    CacheCorruption { id: String, message: String },

    #[error("no cache entry for {0}")]
    NotCached(String),

    #[error("invalid cache key: {0:?}")]
    InvalidCacheKey(String),

    #[error("archive member escapes extraction directory: {0}")]
    PathTraversal(String),

    #[error("artifact {0} contains no usable files")]
    EmptyArtifact(String),

    #[error("unsupported supplementary artifact: {0}")]
    UnsupportedArtifact(String),

    #[error("{0}")]
    ArtifactSelection(String),

    #[error("no array type known for platform {0}")]
    UnknownPlatform(String),

    #[error("sample {sample} is not part of series {series}")]
    SampleNotFound { series: String, sample: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("idat decoding failed: {0}")]
    Decode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub fn network(accession: &str, message: impl Into<String>) -> Self {
        KiraError::NetworkFetch {
            accession: accession.to_string(),
            message: message.into(),
        }
    }

    /// Everything except a terminal "no data" classification is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, KiraError::NoDataAvailable(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KiraError::InvalidSampleAccession(_) | KiraError::InvalidSeriesAccession(_) => {
                "invalid_accession"
            }
            KiraError::InvalidMode(_) => "invalid_mode",
            KiraError::ConfigRead(_) | KiraError::ConfigParse(_) => "config",
            KiraError::NetworkFetch { .. } | KiraError::GeoStatus { .. } => "network",
            KiraError::Parse(_) => "parse",
            KiraError::NoDataAvailable(_) => "no_data",
            KiraError::CacheCorruption { .. }
            | KiraError::NotCached(_)
            | KiraError::InvalidCacheKey(_) => "cache",
            KiraError::PathTraversal(_) => "path_traversal",
            KiraError::EmptyArtifact(_)
            | KiraError::UnsupportedArtifact(_)
            | KiraError::ArtifactSelection(_) => "artifact",
            KiraError::UnknownPlatform(_) => "platform",
            KiraError::SampleNotFound { .. } => "not_found",
            KiraError::MissingTool(_) | KiraError::Decode(_) => "decode",
            KiraError::Filesystem(_) => "filesystem",
        }
    }
}
