use std::fs;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use tempfile::{Builder, TempDir};
use tracing::debug;

use crate::entity::{InfoTable, SampleEntity, SeriesEntity};
use crate::error::KiraError;

pub const CACHE_EXTENSION: &str = "ch";
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedEntity {
    Sample(SampleEntity),
    Series(SeriesEntity),
}

impl CachedEntity {
    pub fn id(&self) -> &str {
        match self {
            CachedEntity::Sample(sample) => &sample.id,
            CachedEntity::Series(series) => &series.id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    schema_version: u32,
    id: String,
    stored_at: DateTime<Utc>,
    entity: CachedEntity,
}

/// One zlib-compressed JSON snapshot per accession under a single root directory.
#[derive(Debug, Clone)]
pub struct AccessionCache {
    root: Utf8PathBuf,
}

impl AccessionCache {
    pub fn default_root() -> Result<Utf8PathBuf, KiraError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-geo-cache"))
                    .ok()
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn entry_path(&self, id: &str) -> Result<Utf8PathBuf, KiraError> {
        Ok(self.root.join(format!("{}.{CACHE_EXTENSION}", cache_key(id)?)))
    }

    pub fn info_table_path(&self, id: &str) -> Result<Utf8PathBuf, KiraError> {
        Ok(self.root.join(format!("{}_INFO.csv", cache_key(id)?)))
    }

    pub fn has(&self, id: &str) -> bool {
        self.entry_path(id)
            .map(|path| path.as_std_path().is_file())
            .unwrap_or(false)
    }

    pub fn store(&self, entity: &CachedEntity) -> Result<(), KiraError> {
        let envelope = CacheEnvelope {
            schema_version: SCHEMA_VERSION,
            id: entity.id().to_string(),
            stored_at: Utc::now(),
            entity: entity.clone(),
        };
        let json =
            serde_json::to_vec(&envelope).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = self.entry_path(entity.id())?;
        self.write_bytes_atomic(&path, &compressed)?;
        debug!(id = entity.id(), bytes = compressed.len(), "stored cache entry");
        Ok(())
    }

    pub fn store_sample(&self, sample: &SampleEntity) -> Result<(), KiraError> {
        self.store(&CachedEntity::Sample(sample.clone()))
    }

    pub fn store_series(&self, series: &SeriesEntity) -> Result<(), KiraError> {
        self.store(&CachedEntity::Series(series.clone()))
    }

    pub fn load(&self, id: &str) -> Result<CachedEntity, KiraError> {
        let path = self.entry_path(id)?;
        if !path.as_std_path().is_file() {
            return Err(KiraError::NotCached(id.to_string()));
        }
        let compressed =
            fs::read(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let corruption = |message: String| KiraError::CacheCorruption {
            id: id.to_string(),
            message,
        };
        let mut json = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|err| corruption(err.to_string()))?;
        let envelope: CacheEnvelope =
            serde_json::from_slice(&json).map_err(|err| corruption(err.to_string()))?;
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(corruption(format!(
                "unsupported schema version {}",
                envelope.schema_version
            )));
        }
        if envelope.entity.id() != id {
            return Err(corruption(format!(
                "entry holds {} instead",
                envelope.entity.id()
            )));
        }
        Ok(envelope.entity)
    }

    pub fn load_sample(&self, id: &str) -> Result<SampleEntity, KiraError> {
        match self.load(id)? {
            CachedEntity::Sample(sample) => Ok(sample),
            CachedEntity::Series(_) => Err(KiraError::CacheCorruption {
                id: id.to_string(),
                message: "expected a sample entry, found a series".to_string(),
            }),
        }
    }

    pub fn load_series(&self, id: &str) -> Result<SeriesEntity, KiraError> {
        match self.load(id)? {
            CachedEntity::Series(series) => Ok(series),
            CachedEntity::Sample(_) => Err(KiraError::CacheCorruption {
                id: id.to_string(),
                message: "expected a series entry, found a sample".to_string(),
            }),
        }
    }

    /// Removes the entry for `id`; returns whether one existed.
    pub fn evict(&self, id: &str) -> Result<bool, KiraError> {
        let path = self.entry_path(id)?;
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path()).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        debug!(id, "evicted cache entry");
        Ok(true)
    }

    /// Deletes every file or directory directly under the root that belongs to `id`
    /// (named `<id>.*` or `<id>_*`).
    pub fn discard_artifacts(&self, id: &str) -> Result<usize, KiraError> {
        self.discard_owned(id, |rest| rest.starts_with('.') || rest.starts_with('_'))
    }

    /// Like [`AccessionCache::discard_artifacts`] but keeps `<id>.ch` and other
    /// `<id>.*` entries; only `<id>_*` scratch paths go.
    pub fn discard_scratch(&self, id: &str) -> Result<usize, KiraError> {
        self.discard_owned(id, |rest| rest.starts_with('_'))
    }

    fn discard_owned(&self, id: &str, owned: impl Fn(&str) -> bool) -> Result<usize, KiraError> {
        let id = cache_key(id)?;
        if !self.root.as_std_path().exists() {
            return Ok(0);
        }
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.strip_prefix(id).map(&owned).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn has_info_table(&self, id: &str) -> bool {
        self.info_table_path(id)
            .map(|path| path.as_std_path().is_file())
            .unwrap_or(false)
    }

    pub fn write_info_table(&self, id: &str, table: &InfoTable) -> Result<(), KiraError> {
        let mut content = Vec::new();
        table.write_csv(&mut content)?;
        self.write_bytes_atomic(&self.info_table_path(id)?, &content)
    }

    pub fn read_info_table(&self, id: &str) -> Result<InfoTable, KiraError> {
        let path = self.info_table_path(id)?;
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
        InfoTable::read_csv(file)
    }

    /// A fresh scratch directory under the root, removed when dropped.
    pub fn work_dir(&self, prefix: &str) -> Result<TempDir, KiraError> {
        self.ensure_root()?;
        Builder::new()
            .prefix(prefix)
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    fn write_bytes_atomic(&self, path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".kira-geo-entry")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Accessions become file names directly under the root, so separators and `..` are refused.
fn cache_key(id: &str) -> Result<&str, KiraError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(KiraError::InvalidCacheKey(id.to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn layout_paths() {
        let cache = AccessionCache::new(Utf8PathBuf::from("/tmp/kira"));
        assert!(cache.entry_path("GSM1").unwrap().ends_with("GSM1.ch"));
        assert!(cache.info_table_path("GSE2").unwrap().ends_with("GSE2_INFO.csv"));
    }

    #[test]
    fn keys_that_leave_the_root_are_refused() {
        for id in ["", "../victim", "a/b", "a\\b", ".."] {
            assert_matches!(cache_key(id), Err(KiraError::InvalidCacheKey(_)));
        }
        assert_eq!(cache_key("GSM1").unwrap(), "GSM1");
    }
}
