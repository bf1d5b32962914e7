use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::geo::DEFAULT_QUERY_BASE_URL;
use crate::store::AccessionCache;

pub const DEFAULT_CONFIG_FILE: &str = "kira-geo.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub cache_root: Option<String>,
    #[serde(default)]
    pub query_base_url: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub remove_sample_caches: Option<bool>,
    #[serde(default)]
    pub decoder: Option<DecoderEntry>,
    #[serde(default)]
    pub array_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DecoderEntry {
    Shorthand(String),
    Detailed(DecoderEntryObject),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderEntryObject {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the wait grows by `backoff` after each failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub cache_root: Utf8PathBuf,
    pub query_base_url: String,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    pub remove_sample_caches: bool,
    pub decoder: DecoderCommand,
    pub array_types: BTreeMap<String, String>,
}

impl ResolvedConfig {
    /// Defaults with an explicit cache root, for embedding and tests.
    pub fn with_cache_root(cache_root: Utf8PathBuf) -> Self {
        let mut resolved = ConfigLoader::resolve_config_with_root(Config::default(), cache_root);
        resolved.retry.backoff = Duration::ZERO;
        resolved
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-geo.json` in the current directory when present.
    /// Without either, defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let cache_root = match &config.cache_root {
            Some(root) => Utf8PathBuf::from(root),
            None => AccessionCache::default_root()?,
        };
        Ok(Self::resolve_config_with_root(config, cache_root))
    }

    fn resolve_config_with_root(config: Config, cache_root: Utf8PathBuf) -> ResolvedConfig {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            backoff: config
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
        };
        let timeout = match config.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(60)),
        };
        let decoder = match config.decoder {
            Some(DecoderEntry::Shorthand(program)) => DecoderCommand {
                program,
                args: Vec::new(),
            },
            Some(DecoderEntry::Detailed(obj)) => DecoderCommand {
                program: obj.program,
                args: obj.args,
            },
            None => default_decoder(),
        };
        let mut array_types = default_array_types();
        array_types.extend(config.array_types);

        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            cache_root,
            query_base_url: config
                .query_base_url
                .unwrap_or_else(|| DEFAULT_QUERY_BASE_URL.to_string()),
            workers: config.workers.unwrap_or(1).max(1),
            retry,
            timeout,
            remove_sample_caches: config.remove_sample_caches.unwrap_or(true),
            decoder,
            array_types,
        }
    }
}

pub fn default_decoder() -> DecoderCommand {
    DecoderCommand {
        program: "kira-idat-decode".to_string(),
        args: Vec::new(),
    }
}

/// Illumina methylation platforms and the array-type tag the decoder expects.
pub fn default_array_types() -> BTreeMap<String, String> {
    [
        ("GPL13534", "450k"),
        ("GPL16304", "450k"),
        ("GPL21145", "epic"),
        ("GPL23976", "epic"),
    ]
    .into_iter()
    .map(|(platform, tag)| (platform.to_string(), tag.to_string()))
    .collect()
}
