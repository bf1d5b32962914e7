use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::config::ResolvedConfig;
use crate::decode::IdatDecoder;
use crate::domain::{ArtifactRef, DataStatus, PopulationMode, SampleAccession, SeriesAccession, file_name_of};
use crate::entity::{InfoTable, SampleEntity, SeriesEntity, Unresolved};
use crate::error::KiraError;
use crate::geo::GeoClient;
use crate::ingest::{BulkIngester, IngestReport, TitleMatching};
use crate::populate::ConcurrentPopulator;
use crate::sample::SamplePipeline;
use crate::store::AccessionCache;

#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    pub overwrite: bool,
    pub shell_only: bool,
}

#[derive(Debug, Clone)]
pub struct SeriesOptions {
    pub mode: PopulationMode,
    /// Falls back to the configured worker count.
    pub workers: Option<usize>,
    pub overwrite: bool,
    pub shell_only: bool,
    /// Falls back to the configured setting.
    pub remove_sample_caches: Option<bool>,
    pub matching: TitleMatching,
}

impl Default for SeriesOptions {
    fn default() -> Self {
        Self {
            mode: PopulationMode::PerSample,
            workers: None,
            overwrite: false,
            shell_only: false,
            remove_sample_caches: None,
            matching: TitleMatching::Lenient,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeriesOutcome {
    pub series: SeriesEntity,
    pub from_cache: bool,
    pub ingest: Option<IngestReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub id: String,
    pub platform_id: String,
    pub series_id: String,
    pub data_status: DataStatus,
    pub probes: usize,
    pub characteristics: usize,
}

impl From<&SampleEntity> for SampleSummary {
    fn from(sample: &SampleEntity) -> Self {
        Self {
            id: sample.id.clone(),
            platform_id: sample.platform_id.clone(),
            series_id: sample.series_id.clone(),
            data_status: sample.data_status,
            probes: sample.data_column().map(|column| column.len()).unwrap_or(0),
            characteristics: sample.characteristics.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub id: String,
    pub title: Option<String>,
    pub platform_id: Option<String>,
    pub source: String,
    pub members: usize,
    pub samples: usize,
    pub samples_with_data: usize,
    pub unresolved: BTreeMap<String, Unresolved>,
    pub ingest: Option<IngestReport>,
}

impl From<&SeriesOutcome> for SeriesSummary {
    fn from(outcome: &SeriesOutcome) -> Self {
        let series = &outcome.series;
        Self {
            id: series.id.clone(),
            title: series.title().map(str::to_string),
            platform_id: series.platform_id().map(str::to_string),
            source: if outcome.from_cache { "cache" } else { "geo" }.to_string(),
            members: series.members.len(),
            samples: series.samples.len(),
            samples_with_data: series
                .samples
                .values()
                .filter(|sample| sample.data_column().is_some())
                .count(),
            unresolved: series.unresolved.clone(),
            ingest: outcome.ingest.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvictResult {
    pub id: String,
    pub evicted: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Cached-or-fetched access to GEO samples and series.
pub struct Engine<C: GeoClient, D: IdatDecoder> {
    config: ResolvedConfig,
    cache: AccessionCache,
    client: C,
    decoder: D,
}

impl<C: GeoClient, D: IdatDecoder> Engine<C, D> {
    pub fn new(config: ResolvedConfig, client: C, decoder: D) -> Self {
        let cache = AccessionCache::new(config.cache_root.clone());
        Self {
            config,
            cache,
            client,
            decoder,
        }
    }

    pub fn cache(&self) -> &AccessionCache {
        &self.cache
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn pipeline(&self, overwrite: bool) -> SamplePipeline<'_, C, D> {
        SamplePipeline::new(
            &self.client,
            &self.decoder,
            &self.cache,
            &self.config.array_types,
        )
        .overwrite(overwrite)
    }

    pub fn sample(
        &self,
        id: &SampleAccession,
        options: SampleOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SampleEntity, KiraError> {
        self.cache.ensure_root()?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; sample {id}"),
            elapsed: None,
        });
        let pipeline = self.pipeline(options.overwrite);
        if options.shell_only {
            pipeline.shell(id.as_str())
        } else {
            pipeline.populated(id.as_str())
        }
    }

    pub fn series(
        &self,
        id: &SeriesAccession,
        options: SeriesOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SeriesOutcome, KiraError> {
        self.cache.ensure_root()?;
        if !options.overwrite && self.cache.has(id.as_str()) {
            sink.event(ProgressEvent {
                message: "phase=Store; using cached series".to_string(),
                elapsed: None,
            });
            return Ok(SeriesOutcome {
                series: self.cache.load_series(id.as_str())?,
                from_cache: true,
                ingest: None,
            });
        }

        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; series {id}"),
            elapsed: None,
        });
        let text = self.client.fetch_record_text(id.as_str())?;
        let mut series = SeriesEntity::from_soft(id.as_str(), &text);
        info!(series = %id, members = series.members.len(), "series record parsed");

        let populator = ConcurrentPopulator::new(
            options.workers.unwrap_or(self.config.workers),
            self.config.retry,
        );
        let pipeline = self.pipeline(options.overwrite);
        let artifact = match (&options.mode, options.shell_only) {
            (PopulationMode::Supplementary(artifact), false) => {
                Some(resolve_artifact(&series, artifact)?)
            }
            _ => None,
        };
        let shells = options.shell_only || artifact.is_some();
        let population = populator.populate(&pipeline, &series.members, shells, sink);
        series.samples = population.samples;
        series.unresolved = population.unresolved;

        let ingest = match artifact {
            Some(url) => {
                sink.event(ProgressEvent {
                    message: format!("phase=Ingest; {}", file_name_of(&url)),
                    elapsed: Some(start.elapsed()),
                });
                let ingester = BulkIngester::new(
                    &self.client,
                    &self.decoder,
                    &self.cache,
                    &self.config.array_types,
                )
                .matching(options.matching);
                Some(ingester.ingest(&mut series, &url)?)
            }
            None => None,
        };

        sink.event(ProgressEvent {
            message: "phase=Store; writing series cache".to_string(),
            elapsed: Some(start.elapsed()),
        });
        self.cache.store_series(&series)?;
        if options
            .remove_sample_caches
            .unwrap_or(self.config.remove_sample_caches)
        {
            for sample in series.samples.keys() {
                self.cache.evict(sample)?;
            }
        }

        Ok(SeriesOutcome {
            series,
            from_cache: false,
            ingest,
        })
    }

    /// Flattened sample metadata of a series, served from `<id>_INFO.csv` when present.
    pub fn sample_info_table(
        &self,
        id: &SeriesAccession,
        sink: &dyn ProgressSink,
    ) -> Result<InfoTable, KiraError> {
        if self.cache.has_info_table(id.as_str()) {
            sink.event(ProgressEvent {
                message: "phase=Store; using cached info table".to_string(),
                elapsed: None,
            });
            return self.cache.read_info_table(id.as_str());
        }

        self.cache.ensure_root()?;
        let text = self.client.fetch_record_text(id.as_str())?;
        let series = SeriesEntity::from_soft(id.as_str(), &text);
        let populator = ConcurrentPopulator::new(self.config.workers, self.config.retry);
        let population = populator.populate(&self.pipeline(false), &series.members, true, sink);
        let table = InfoTable::from_records(
            series
                .members
                .iter()
                .filter_map(|member| population.samples.get(member))
                .map(|sample| &sample.info),
        );
        self.cache.write_info_table(id.as_str(), &table)?;
        Ok(table)
    }

    pub fn evict(&self, id: &str) -> Result<EvictResult, KiraError> {
        Ok(EvictResult {
            id: id.to_string(),
            evicted: self.cache.evict(id)?,
        })
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.cache.has(id)
    }
}

/// Turns a pre-resolved artifact selection into the URL to download.
pub fn resolve_artifact(series: &SeriesEntity, artifact: &ArtifactRef) -> Result<String, KiraError> {
    let available = series.supplementary_files();
    let found = match artifact {
        ArtifactRef::Url(url) => return Ok(url.clone()),
        ArtifactRef::FileName(name) => available
            .iter()
            .find(|url| file_name_of(url) == name.as_str())
            .map(|url| url.to_string()),
        ArtifactRef::Index(index) => index
            .checked_sub(1)
            .and_then(|position| available.get(position))
            .map(|url| url.to_string()),
    };
    found.ok_or_else(|| {
        let names: Vec<&str> = available.iter().map(|url| file_name_of(url)).collect();
        KiraError::ArtifactSelection(format!(
            "{artifact:?} does not match a supplementary file of {} (available: {})",
            series.id,
            names.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn series() -> SeriesEntity {
        SeriesEntity::from_soft(
            "GSE5",
            "!Series_supplementary_file = ftp://x/GSE5_RAW.tar\n!Series_supplementary_file = ftp://x/GSE5_betas.csv.gz\n",
        )
    }

    #[test]
    fn artifact_by_index_and_name() {
        let series = series();
        assert_eq!(
            resolve_artifact(&series, &ArtifactRef::Index(2)).unwrap(),
            "ftp://x/GSE5_betas.csv.gz"
        );
        assert_eq!(
            resolve_artifact(&series, &ArtifactRef::FileName("GSE5_RAW.tar".to_string())).unwrap(),
            "ftp://x/GSE5_RAW.tar"
        );
    }

    #[test]
    fn artifact_out_of_range() {
        assert_matches!(
            resolve_artifact(&series(), &ArtifactRef::Index(0)),
            Err(KiraError::ArtifactSelection(_))
        );
        assert_matches!(
            resolve_artifact(&series(), &ArtifactRef::Index(3)),
            Err(KiraError::ArtifactSelection(_))
        );
    }
}
