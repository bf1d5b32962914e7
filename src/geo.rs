use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::KiraError;

pub const DEFAULT_QUERY_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi";

const RECORD_MARKERS: [&str; 2] = ["SAMPLE", "SERIES"];

pub trait GeoClient: Send + Sync {
    /// SOFT text of a sample or series card (`view=quick`).
    fn fetch_record_text(&self, accession: &str) -> Result<String, KiraError>;
    /// Inline data table of a sample card (`view=data`).
    fn fetch_data_text(&self, accession: &str) -> Result<String, KiraError>;
    fn download_url(&self, url: &str, destination: &Path) -> Result<(), KiraError>;
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
    base_url: String,
}

impl GeoHttpClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-geo/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::network("client", err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('?').to_string(),
        })
    }

    pub fn query_url(&self, accession: &str, view: &str) -> String {
        format!(
            "{}?acc={accession}&targ=self&form=text&view={view}",
            self.base_url
        )
    }

    fn normalize_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/{}", rest);
        }
        url.to_string()
    }

    fn get_text(&self, accession: &str, url: &str) -> Result<String, KiraError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::network(accession, err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(KiraError::GeoStatus { status, message });
        }
        response
            .text()
            .map_err(|err| KiraError::network(accession, err.to_string()))
    }

    fn write_response_to_file(
        &self,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), KiraError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(KiraError::GeoStatus { status, message });
        }
        let mut file =
            File::create(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl GeoClient for GeoHttpClient {
    fn fetch_record_text(&self, accession: &str) -> Result<String, KiraError> {
        let text = self.get_text(accession, &self.query_url(accession, "quick"))?;
        ensure_record_marker(accession, &text)?;
        Ok(text)
    }

    fn fetch_data_text(&self, accession: &str) -> Result<String, KiraError> {
        self.get_text(accession, &self.query_url(accession, "data"))
    }

    fn download_url(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let url = Self::normalize_url(url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| KiraError::network(&url, err.to_string()))?;
        self.write_response_to_file(response, destination)
    }
}

/// GEO answers unknown accessions with a 200 page that carries no record.
pub fn ensure_record_marker(accession: &str, text: &str) -> Result<(), KiraError> {
    if RECORD_MARKERS.iter().any(|marker| text.contains(marker)) {
        Ok(())
    } else {
        Err(KiraError::network(
            accession,
            "response does not contain a SAMPLE or SERIES record",
        ))
    }
}
