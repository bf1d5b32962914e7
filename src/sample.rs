use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::classify::{self, SUPPLEMENTARY_FIELD};
use crate::decode::IdatDecoder;
use crate::domain::{DataStatus, file_name_of};
use crate::entity::{SampleData, SampleEntity};
use crate::error::KiraError;
use crate::fs_util;
use crate::geo::GeoClient;
use crate::populate::SampleSource;
use crate::soft;
use crate::store::AccessionCache;
use crate::table::{self, ProbeColumn};

/// Fetches, classifies and fills sample entities, caching each finished sample.
pub struct SamplePipeline<'a, C: GeoClient, D: IdatDecoder> {
    client: &'a C,
    decoder: &'a D,
    cache: &'a AccessionCache,
    array_types: &'a BTreeMap<String, String>,
    overwrite: bool,
}

impl<'a, C: GeoClient, D: IdatDecoder> SamplePipeline<'a, C, D> {
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
            overwrite: false,
        }
    }

    /// Ignore existing per-sample cache entries and fetch again.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Metadata only; the data stays deferred and nothing is cached.
    pub fn shell(&self, id: &str) -> Result<SampleEntity, KiraError> {
        let text = self.client.fetch_record_text(id)?;
        let status = classify::classify(&text).unwrap_or_else(|err| {
            debug!(id, %err, "shell sample left unclassified");
            DataStatus::None
        });
        let mut sample = SampleEntity::from_record(id, soft::parse_sample_record(&text), status);
        sample.data = SampleData::InfoOnly;
        Ok(sample)
    }

    pub fn populated(&self, id: &str) -> Result<SampleEntity, KiraError> {
        if !self.overwrite && self.cache.has(id) {
            debug!(id, "sample served from cache");
            return self.cache.load_sample(id);
        }

        let text = self.client.fetch_record_text(id)?;
        let status = classify::classify(&text)?;
        let mut sample = SampleEntity::from_record(id, soft::parse_sample_record(&text), status);

        let column = match status {
            DataStatus::None => return Err(KiraError::NoDataAvailable(id.to_string())),
            DataStatus::OnPage => {
                let data = self.client.fetch_data_text(id)?;
                table::parse_inline_table(&data, id)?
            }
            DataStatus::IdatPair => self.idat_column(&sample, &text)?,
        };
        sample.attach(column);
        self.cache.store_sample(&sample)?;
        Ok(sample)
    }

    fn idat_column(&self, sample: &SampleEntity, text: &str) -> Result<ProbeColumn, KiraError> {
        let array_type = self
            .array_types
            .get(&sample.platform_id)
            .ok_or_else(|| KiraError::UnknownPlatform(sample.platform_id.clone()))?;
        let work = self.cache.work_dir(&format!("{}_idat", sample.id))?;
        for url in soft::field_values(text, SUPPLEMENTARY_FIELD).iter().take(2) {
            let destination = work.path().join(file_name_of(url));
            self.client.download_url(url, &destination)?;
            fs_util::gunzip_in_place(&destination)?;
        }

        let decoded = self.decoder.decode(work.path(), array_type)?;
        let column = match decoded.column(&sample.id) {
            Some(column) => column,
            None if decoded.columns.len() == 1 => {
                let name = decoded.column_names().next().unwrap_or_default().to_string();
                warn!(id = %sample.id, column = %name, "decoder column not named by accession");
                decoded.column(&name).ok_or_else(|| {
                    KiraError::Decode(format!("decoder output lost column {name}"))
                })?
            }
            None => {
                return Err(KiraError::Decode(format!(
                    "decoder output has no column for {}",
                    sample.id
                )));
            }
        };
        Ok(column)
    }
}

impl<C: GeoClient, D: IdatDecoder> SampleSource for SamplePipeline<'_, C, D> {
    fn build_sample(&self, id: &str, shell_only: bool) -> Result<SampleEntity, KiraError> {
        if shell_only {
            self.shell(id)
        } else {
            self.populated(id)
        }
    }

    fn discard_partial(&self, id: &str, shell_only: bool) -> Result<(), KiraError> {
        let removed = if shell_only {
            self.cache.discard_scratch(id)?
        } else {
            self.cache.discard_artifacts(id)?
        };
        if removed > 0 {
            debug!(id, removed, "discarded partial artifacts");
        }
        Ok(())
    }
}
