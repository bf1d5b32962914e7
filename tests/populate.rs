use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_geo_cache::app::{ProgressEvent, ProgressSink};
use kira_geo_cache::config::RetryPolicy;
use kira_geo_cache::domain::DataStatus;
use kira_geo_cache::entity::{SampleData, SampleEntity, Unresolved};
use kira_geo_cache::error::KiraError;
use kira_geo_cache::output::JsonOutput;
use kira_geo_cache::populate::{ConcurrentPopulator, SampleSource};
use kira_geo_cache::soft::Record;

#[derive(Default)]
struct StubSource {
    no_data: BTreeSet<String>,
    broken: BTreeSet<String>,
    failures_before_success: BTreeMap<String, u32>,
    builds: Mutex<BTreeMap<String, u32>>,
    discards: Mutex<usize>,
}

impl StubSource {
    fn builds_of(&self, id: &str) -> u32 {
        self.builds.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

impl SampleSource for StubSource {
    fn build_sample(&self, id: &str, shell_only: bool) -> Result<SampleEntity, KiraError> {
        let attempt = {
            let mut builds = self.builds.lock().unwrap();
            let count = builds.entry(id.to_string()).or_default();
            *count += 1;
            *count
        };
        if self.no_data.contains(id) {
            return Err(KiraError::NoDataAvailable(id.to_string()));
        }
        if self.broken.contains(id) {
            return Err(KiraError::network(id, "connection reset"));
        }
        if let Some(failures) = self.failures_before_success.get(id) {
            if attempt <= *failures {
                return Err(KiraError::GeoStatus {
                    status: 503,
                    message: "busy".to_string(),
                });
            }
        }
        let mut sample = SampleEntity::from_record(id, Record::new(), DataStatus::OnPage);
        if shell_only {
            sample.data = SampleData::InfoOnly;
        }
        Ok(sample)
    }

    fn discard_partial(&self, _id: &str, _shell_only: bool) -> Result<(), KiraError> {
        *self.discards.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Duration::ZERO,
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn every_member_lands_in_exactly_one_bucket() {
    let source = StubSource {
        no_data: ["GSM3".to_string()].into(),
        ..StubSource::default()
    };
    let members = ids(&["GSM1", "GSM2", "GSM3", "GSM4", "GSM5"]);
    let population =
        ConcurrentPopulator::new(2, retry(4)).populate(&source, &members, false, &JsonOutput);

    assert_eq!(population.len(), 5);
    assert_eq!(population.samples.len(), 4);
    assert_eq!(population.unresolved.get("GSM3"), Some(&Unresolved::NoData));
    for id in &members {
        assert!(population.samples.contains_key(id) != population.unresolved.contains_key(id));
    }
    // no data is terminal, never retried
    assert_eq!(source.builds_of("GSM3"), 1);
    assert_eq!(*source.discards.lock().unwrap(), 0);
}

#[test]
fn transient_failures_are_retried() {
    let source = StubSource {
        failures_before_success: [("GSM1".to_string(), 2)].into(),
        ..StubSource::default()
    };
    let population =
        ConcurrentPopulator::new(1, retry(4)).populate(&source, &ids(&["GSM1"]), false, &JsonOutput);

    assert!(population.samples.contains_key("GSM1"));
    assert!(population.unresolved.is_empty());
    assert_eq!(source.builds_of("GSM1"), 3);
    assert_eq!(*source.discards.lock().unwrap(), 2);
}

#[test]
fn exhausted_retries_record_the_last_error() {
    let source = StubSource {
        broken: ["GSM2".to_string()].into(),
        ..StubSource::default()
    };
    let population = ConcurrentPopulator::new(4, retry(3)).populate(
        &source,
        &ids(&["GSM1", "GSM2"]),
        false,
        &JsonOutput,
    );

    assert!(population.samples.contains_key("GSM1"));
    assert_matches!(
        population.unresolved.get("GSM2"),
        Some(Unresolved::Exhausted { attempts: 3, kind, .. }) if kind == "network"
    );
    assert_eq!(source.builds_of("GSM2"), 3);
}

#[test]
fn duplicate_ids_are_built_once() {
    let source = StubSource::default();
    let population = ConcurrentPopulator::new(3, retry(4)).populate(
        &source,
        &ids(&["GSM1", "GSM2", "GSM1"]),
        true,
        &JsonOutput,
    );

    assert_eq!(population.len(), 2);
    assert_eq!(source.builds_of("GSM1"), 1);
    assert_eq!(population.samples["GSM2"].data, SampleData::InfoOnly);
}

#[test]
fn progress_is_reported_per_chunk() {
    let source = StubSource::default();
    let sink = RecordingSink::default();
    ConcurrentPopulator::new(2, retry(1)).populate(
        &source,
        &ids(&["GSM1", "GSM2", "GSM3", "GSM4", "GSM5"]),
        false,
        &sink,
    );

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|message| message.starts_with("phase=Populate")));
    assert!(events[2].contains("5/5"));
}

#[test]
fn empty_member_list() {
    let population =
        ConcurrentPopulator::new(2, retry(1)).populate(&StubSource::default(), &[], false, &JsonOutput);
    assert!(population.is_empty());
}
