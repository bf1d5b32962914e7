use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::decode::IdatDecoder;
use crate::domain::{ArchiveFormat, ArtifactKind, file_name_of};
use crate::entity::SeriesEntity;
use crate::error::KiraError;
use crate::fs_util;
use crate::geo::GeoClient;
use crate::store::AccessionCache;
use crate::table::ProbeTable;

const IDAT_MARKER: &str = ".idat";

/// How strictly tabular column headers must match sample titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleMatching {
    /// Unmatched columns are dropped with a warning.
    #[default]
    Lenient,
    /// Any unmatched column fails the ingestion before data is attached.
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub artifact: String,
    pub attached: Vec<String>,
    pub unmatched_columns: Vec<String>,
}

/// Distributes one shared supplementary artifact over a series' shell samples.
pub struct BulkIngester<'a, C: GeoClient, D: IdatDecoder> {
    client: &'a C,
    decoder: &'a D,
    cache: &'a AccessionCache,
    array_types: &'a BTreeMap<String, String>,
    matching: TitleMatching,
}

impl<'a, C: GeoClient, D: IdatDecoder> BulkIngester<'a, C, D> {
    pub fn new(
        client: &'a C,
        decoder: &'a D,
        cache: &'a AccessionCache,
        array_types: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            decoder,
            cache,
            array_types,
            matching: TitleMatching::default(),
        }
    }

    pub fn matching(mut self, matching: TitleMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn ingest(&self, series: &mut SeriesEntity, url: &str) -> Result<IngestReport, KiraError> {
        let file_name = file_name_of(url);
        let kind = ArtifactKind::from_file_name(file_name)?;
        let work = self.cache.work_dir(&format!("{}_supp", series.id))?;
        let artifact = work.path().join(file_name);
        info!(series = %series.id, artifact = file_name, "downloading supplementary artifact");
        self.client.download_url(url, &artifact)?;

        let mut report = match kind {
            ArtifactKind::Tabular => self.ingest_tabular(series, &artifact)?,
            ArtifactKind::Archive(format) => {
                let extracted = work.path().join("extracted");
                self.ingest_archive(series, &artifact, format, &extracted)?
            }
        };
        report.artifact = file_name.to_string();
        Ok(report)
    }

    /// A (possibly gzipped) CSV whose columns are sample titles.
    pub fn ingest_tabular(
        &self,
        series: &mut SeriesEntity,
        artifact: &Path,
    ) -> Result<IngestReport, KiraError> {
        let csv_path = fs_util::gunzip_in_place(artifact)?;
        let table = ProbeTable::from_path(&csv_path)?;
        attach_by_title(series, &table, self.matching)
    }

    /// An archive of idat files, decoded into a table keyed by accession.
    pub fn ingest_archive(
        &self,
        series: &mut SeriesEntity,
        artifact: &Path,
        format: ArchiveFormat,
        extract_dir: &Path,
    ) -> Result<IngestReport, KiraError> {
        let array_type = series.array_type(self.array_types)?;
        let idats = unpack_idat_archive(artifact, format, extract_dir)?;
        info!(series = %series.id, files = idats.len(), %array_type, "decoding idat archive");
        let table = self.decoder.decode(extract_dir, &array_type)?;
        Ok(attach_by_accession(series, &table))
    }
}

/// Extracts `artifact` into `extract_dir` and keeps only idat files.
pub fn unpack_idat_archive(
    artifact: &Path,
    format: ArchiveFormat,
    extract_dir: &Path,
) -> Result<Vec<PathBuf>, KiraError> {
    std::fs::create_dir_all(extract_dir).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    match format {
        ArchiveFormat::Tar => fs_util::extract_tar(artifact, extract_dir, false)?,
        ArchiveFormat::TarGz => fs_util::extract_tar(artifact, extract_dir, true)?,
        ArchiveFormat::Zip => fs_util::extract_zip(artifact, extract_dir)?,
    }
    let idats = fs_util::retain_marked_files(extract_dir, IDAT_MARKER)?;
    if idats.is_empty() {
        return Err(KiraError::EmptyArtifact(
            artifact
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| artifact.display().to_string()),
        ));
    }
    Ok(idats)
}

/// Attaches each column to the samples whose `title` equals the column header exactly.
pub fn attach_by_title(
    series: &mut SeriesEntity,
    table: &ProbeTable,
    matching: TitleMatching,
) -> Result<IngestReport, KiraError> {
    let mut assignments: Vec<(String, String)> = Vec::new();
    let mut unmatched = Vec::new();
    for column in table.column_names() {
        let targets: Vec<String> = series
            .samples
            .values()
            .filter(|sample| sample.title() == Some(column))
            .map(|sample| sample.id.clone())
            .collect();
        if targets.is_empty() {
            unmatched.push(column.to_string());
            continue;
        }
        if targets.len() > 1 {
            warn!(column, samples = ?targets, "column title shared by several samples");
        }
        assignments.extend(targets.into_iter().map(|id| (id, column.to_string())));
    }

    if matching == TitleMatching::Strict && !unmatched.is_empty() {
        return Err(KiraError::Parse(format!(
            "columns without a matching sample title: {}",
            unmatched.join(", ")
        )));
    }
    for column in &unmatched {
        warn!(series = %series.id, column, "dropping column with no matching sample title");
    }

    let mut attached = Vec::new();
    for (id, column) in assignments {
        if let (Some(sample), Some(data)) = (series.samples.get_mut(&id), table.column(&column)) {
            sample.attach(data);
            attached.push(id);
        }
    }
    Ok(IngestReport {
        artifact: String::new(),
        attached,
        unmatched_columns: unmatched,
    })
}

/// Attaches each column to the sample with the same accession.
pub fn attach_by_accession(series: &mut SeriesEntity, table: &ProbeTable) -> IngestReport {
    let mut report = IngestReport::default();
    for name in table.column_names() {
        match (series.samples.get_mut(name), table.column(name)) {
            (Some(sample), Some(data)) => {
                sample.attach(data);
                report.attached.push(name.to_string());
            }
            _ => {
                warn!(series = %series.id, column = name, "decoded column has no matching sample");
                report.unmatched_columns.push(name.to_string());
            }
        }
    }
    report
}
