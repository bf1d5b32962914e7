use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

use kira_geo_cache::config::default_array_types;
use kira_geo_cache::decode::IdatDecoder;
use kira_geo_cache::domain::{ArchiveFormat, DataStatus};
use kira_geo_cache::entity::{SampleData, SampleEntity, SeriesEntity};
use kira_geo_cache::error::KiraError;
use kira_geo_cache::geo::GeoClient;
use kira_geo_cache::ingest::{
    BulkIngester, TitleMatching, attach_by_accession, attach_by_title, unpack_idat_archive,
};
use kira_geo_cache::soft::parse_sample_record;
use kira_geo_cache::store::AccessionCache;
use kira_geo_cache::table::ProbeTable;

fn shell(id: &str, title: &str) -> SampleEntity {
    let text = format!("^SAMPLE = {id}\n!Sample_title = {title}\n!Sample_platform_id = GPL13534\n");
    let mut sample = SampleEntity::from_record(id, parse_sample_record(&text), DataStatus::IdatPair);
    sample.data = SampleData::InfoOnly;
    sample
}

fn series_with_shells(titles: &[(&str, &str)]) -> SeriesEntity {
    let mut text = String::from(
        "!Series_platform_id = GPL13534\n!Series_supplementary_file = ftp://x/GSE9_RAW.tar\n",
    );
    for (id, _) in titles {
        text.push_str(&format!("!Series_sample_id = {id}\n"));
    }
    let mut series = SeriesEntity::from_soft("GSE9", &text);
    for (id, title) in titles {
        series.samples.insert(id.to_string(), shell(id, title));
    }
    series
}

fn betas(csv: &str) -> ProbeTable {
    ProbeTable::read_csv(csv.as_bytes()).unwrap()
}

fn write_tar(path: &Path, members: &[(&str, &[u8])]) {
    let mut builder = Builder::new(fs::File::create(path).unwrap());
    for (name, data) in members {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.finish().unwrap();
}

/// `append_data` refuses `..`, so the name bytes are written into the header directly.
fn write_hostile_tar(path: &Path) {
    let mut builder = Builder::new(fs::File::create(path).unwrap());
    let mut good = Header::new_gnu();
    good.set_size(4);
    good.set_mode(0o644);
    good.set_entry_type(EntryType::Regular);
    builder
        .append_data(&mut good, "GSM1_Grn.idat", &b"IDAT"[..])
        .unwrap();

    let data = b"pwned";
    let mut evil = Header::new_old();
    evil.as_old_mut().name[..7].copy_from_slice(b"../evil");
    evil.set_size(data.len() as u64);
    evil.set_mode(0o644);
    evil.set_entry_type(EntryType::Regular);
    evil.set_cksum();
    builder.append(&evil, &data[..]).unwrap();
    builder.finish().unwrap();
}

#[test]
fn tabular_columns_attach_by_title() {
    let mut series = series_with_shells(&[("GSM1", "A"), ("GSM2", "B"), ("GSM3", "C")]);
    let table = betas("probe,A,C\ncg01,0.1,0.3\ncg02,0.2,\n");

    let report = attach_by_title(&mut series, &table, TitleMatching::Lenient).unwrap();

    assert_eq!(report.attached, vec!["GSM1", "GSM3"]);
    assert!(report.unmatched_columns.is_empty());
    let first = series.sample("GSM1").unwrap().data_column().unwrap();
    assert_eq!(first.name, "GSM1");
    assert_eq!(first.get("cg02"), Some(0.2));
    let third = series.sample("GSM3").unwrap().data_column().unwrap();
    assert_eq!(third.get("cg01"), Some(0.3));
    assert_eq!(third.get("cg02"), None);
    assert_eq!(series.sample("GSM2").unwrap().data, SampleData::InfoOnly);
}

#[test]
fn lenient_matching_drops_unknown_columns() {
    let mut series = series_with_shells(&[("GSM1", "A")]);
    let table = betas("probe,A,Z\ncg01,0.1,0.9\n");

    let report = attach_by_title(&mut series, &table, TitleMatching::Lenient).unwrap();

    assert_eq!(report.attached, vec!["GSM1"]);
    assert_eq!(report.unmatched_columns, vec!["Z"]);
}

#[test]
fn strict_matching_rejects_unknown_columns_before_attaching() {
    let mut series = series_with_shells(&[("GSM1", "A")]);
    let table = betas("probe,A,Z\ncg01,0.1,0.9\n");

    let err = attach_by_title(&mut series, &table, TitleMatching::Strict).unwrap_err();

    assert_matches!(err, KiraError::Parse(_));
    assert_eq!(series.sample("GSM1").unwrap().data, SampleData::InfoOnly);
}

#[test]
fn decoded_columns_attach_by_accession() {
    let mut series = series_with_shells(&[("GSM1", "A"), ("GSM2", "B")]);
    let table = betas("probe,GSM2,GSM77\ncg01,0.5,0.6\n");

    let report = attach_by_accession(&mut series, &table);

    assert_eq!(report.attached, vec!["GSM2"]);
    assert_eq!(report.unmatched_columns, vec!["GSM77"]);
    assert!(series.sample("GSM1").unwrap().data_column().is_none());
}

#[test]
fn hostile_tar_member_is_rejected_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("GSE9_RAW.tar");
    write_hostile_tar(&artifact);
    let extract_dir = dir.path().join("work").join("extracted");

    let err = unpack_idat_archive(&artifact, ArchiveFormat::Tar, &extract_dir).unwrap_err();

    assert_matches!(err, KiraError::PathTraversal(_));
    assert!(!dir.path().join("work").join("evil").exists());
    assert!(!extract_dir.join("GSM1_Grn.idat").exists());
}

#[test]
fn archive_without_idat_files_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("GSE9_RAW.tar");
    write_tar(&artifact, &[("README.txt", b"nothing here"), ("filelist.txt", b"x")]);
    let extract_dir = dir.path().join("extracted");

    let err = unpack_idat_archive(&artifact, ArchiveFormat::Tar, &extract_dir).unwrap_err();

    assert_matches!(err, KiraError::EmptyArtifact(_));
}

#[test]
fn gzipped_tar_keeps_and_inflates_idat_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut inner = GzEncoder::new(Vec::new(), Compression::default());
    inner.write_all(b"IDAT-green").unwrap();
    let inner = inner.finish().unwrap();

    let plain = dir.path().join("plain.tar");
    write_tar(
        &plain,
        &[
            ("GSM1_Grn.idat.gz", inner.as_slice()),
            ("GSM1_Red.idat", b"IDAT-red"),
            ("GSE9_filelist.txt", b"list"),
        ],
    );
    let mut outer = GzEncoder::new(Vec::new(), Compression::default());
    outer.write_all(&fs::read(&plain).unwrap()).unwrap();
    let artifact = dir.path().join("GSE9_RAW.tar.gz");
    fs::write(&artifact, outer.finish().unwrap()).unwrap();
    let extract_dir = dir.path().join("extracted");

    let kept = unpack_idat_archive(&artifact, ArchiveFormat::TarGz, &extract_dir).unwrap();

    assert_eq!(
        kept,
        vec![extract_dir.join("GSM1_Grn.idat"), extract_dir.join("GSM1_Red.idat")]
    );
    assert_eq!(fs::read(extract_dir.join("GSM1_Grn.idat")).unwrap(), b"IDAT-green");
    assert!(!extract_dir.join("GSE9_filelist.txt").exists());
}

#[test]
fn zip_archive_is_unpacked() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("GSE9_RAW.zip");
    let mut writer = zip::ZipWriter::new(fs::File::create(&artifact).unwrap());
    writer
        .start_file("idats/GSM1_Grn.idat", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"IDAT").unwrap();
    writer.finish().unwrap();
    let extract_dir = dir.path().join("extracted");

    let kept = unpack_idat_archive(&artifact, ArchiveFormat::Zip, &extract_dir).unwrap();

    assert_eq!(kept, vec![extract_dir.join("idats").join("GSM1_Grn.idat")]);
}

struct FileServer {
    files: BTreeMap<String, Vec<u8>>,
}

impl GeoClient for FileServer {
    fn fetch_record_text(&self, accession: &str) -> Result<String, KiraError> {
        Err(KiraError::network(accession, "offline"))
    }

    fn fetch_data_text(&self, accession: &str) -> Result<String, KiraError> {
        Err(KiraError::network(accession, "offline"))
    }

    fn download_url(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let bytes = self
            .files
            .get(url)
            .ok_or_else(|| KiraError::network(url, "not found"))?;
        fs::write(destination, bytes).map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

#[derive(Default)]
struct ListingDecoder {
    seen: Mutex<Vec<(usize, String)>>,
}

impl IdatDecoder for ListingDecoder {
    fn decode(&self, dir: &Path, array_type: &str) -> Result<ProbeTable, KiraError> {
        let files = fs::read_dir(dir).unwrap().count();
        self.seen
            .lock()
            .unwrap()
            .push((files, array_type.to_string()));
        Ok(ProbeTable::read_csv(&b"probe,GSM1\ncg01,0.42\n"[..]).unwrap())
    }
}

fn cache_in(dir: &Path) -> AccessionCache {
    AccessionCache::new(Utf8PathBuf::from_path_buf(dir.join("cache")).unwrap())
}

#[test]
fn ingest_downloads_and_decodes_archive() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging.tar");
    write_tar(
        &staging,
        &[("GSM1_Grn.idat", b"IDAT"), ("GSM1_Red.idat", b"IDAT")],
    );
    let client = FileServer {
        files: [("ftp://x/GSE9_RAW.tar".to_string(), fs::read(&staging).unwrap())].into(),
    };
    let decoder = ListingDecoder::default();
    let cache = cache_in(dir.path());
    let array_types = default_array_types();
    let mut series = series_with_shells(&[("GSM1", "A")]);

    let report = BulkIngester::new(&client, &decoder, &cache, &array_types)
        .ingest(&mut series, "ftp://x/GSE9_RAW.tar")
        .unwrap();

    assert_eq!(report.artifact, "GSE9_RAW.tar");
    assert_eq!(report.attached, vec!["GSM1"]);
    assert_eq!(
        series.sample("GSM1").unwrap().data_column().unwrap().get("cg01"),
        Some(0.42)
    );
    assert_eq!(*decoder.seen.lock().unwrap(), vec![(2, "450k".to_string())]);
    // the scratch directory is gone once ingestion returns
    assert_eq!(fs::read_dir(cache.root().as_std_path()).unwrap().count(), 0);
}

#[test]
fn ingest_tabular_gzip_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"probe,A,B\ncg01,0.1,0.2\n").unwrap();
    let client = FileServer {
        files: [(
            "ftp://x/GSE9_betas.csv.gz".to_string(),
            encoder.finish().unwrap(),
        )]
        .into(),
    };
    let cache = cache_in(dir.path());
    let array_types = default_array_types();
    let decoder = ListingDecoder::default();
    let mut series = series_with_shells(&[("GSM1", "A"), ("GSM2", "B")]);

    let report = BulkIngester::new(&client, &decoder, &cache, &array_types)
        .matching(TitleMatching::Strict)
        .ingest(&mut series, "ftp://x/GSE9_betas.csv.gz")
        .unwrap();

    assert_eq!(report.attached, vec!["GSM1", "GSM2"]);
    assert!(decoder.seen.lock().unwrap().is_empty());
    assert_eq!(series.data_table().column_names().count(), 2);
}

#[test]
fn unsupported_artifact_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let client = FileServer {
        files: BTreeMap::new(),
    };
    let cache = cache_in(dir.path());
    let array_types = default_array_types();
    let decoder = ListingDecoder::default();
    let mut series = series_with_shells(&[("GSM1", "A")]);

    let err = BulkIngester::new(&client, &decoder, &cache, &array_types)
        .ingest(&mut series, "ftp://x/GSE9_series_matrix.txt.gz")
        .unwrap_err();

    assert_matches!(err, KiraError::UnsupportedArtifact(_));
}
