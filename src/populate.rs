use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::RetryPolicy;
use crate::entity::{SampleEntity, Unresolved};
use crate::error::KiraError;

/// Produces one sample entity per accession. Called from several worker threads at once.
pub trait SampleSource: Sync {
    fn build_sample(&self, id: &str, shell_only: bool) -> Result<SampleEntity, KiraError>;

    /// Drops whatever a failed attempt left behind before the next one. Shell builds never
    /// write an entry of their own, so an existing one must survive.
    fn discard_partial(&self, _id: &str, _shell_only: bool) -> Result<(), KiraError> {
        Ok(())
    }
}

/// Result of a population run: every requested id lands in exactly one of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Population {
    pub samples: BTreeMap<String, SampleEntity>,
    pub unresolved: BTreeMap<String, Unresolved>,
}

impl Population {
    pub fn len(&self) -> usize {
        self.samples.len() + self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.unresolved.is_empty()
    }
}

enum Outcome {
    Resolved(SampleEntity),
    Unresolved(Unresolved),
}

/// Builds samples in chunks of `workers` threads, joining each chunk before starting
/// the next. Workers hand their result back through the join handle; only the
/// orchestrating thread touches the result maps.
#[derive(Debug, Clone)]
pub struct ConcurrentPopulator {
    workers: usize,
    retry: RetryPolicy,
}

impl ConcurrentPopulator {
    pub fn new(workers: usize, retry: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            retry,
        }
    }

    pub fn populate<S: SampleSource>(
        &self,
        source: &S,
        ids: &[String],
        shell_only: bool,
        sink: &dyn ProgressSink,
    ) -> Population {
        let mut seen = BTreeSet::new();
        let unique: Vec<&String> = ids.iter().filter(|id| seen.insert(id.as_str())).collect();
        let total = unique.len();
        let started = Instant::now();
        let mut population = Population::default();

        for chunk in unique.chunks(self.workers) {
            let results: Vec<(String, Outcome)> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|id| {
                        let id = id.as_str();
                        (id, scope.spawn(move || self.resolve(source, id, shell_only)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(id, handle)| {
                        let outcome = handle.join().unwrap_or_else(|_| {
                            Outcome::Unresolved(Unresolved::Exhausted {
                                attempts: 0,
                                kind: "panic".to_string(),
                                message: "worker thread panicked".to_string(),
                            })
                        });
                        (id.to_string(), outcome)
                    })
                    .collect()
            });

            for (id, outcome) in results {
                match outcome {
                    Outcome::Resolved(sample) => {
                        population.samples.insert(id, sample);
                    }
                    Outcome::Unresolved(reason) => {
                        population.unresolved.insert(id, reason);
                    }
                }
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Populate; {}/{} samples resolved, {} unresolved",
                    population.len(),
                    total,
                    population.unresolved.len()
                ),
                elapsed: Some(started.elapsed()),
            });
        }
        population
    }

    fn resolve<S: SampleSource>(&self, source: &S, id: &str, shell_only: bool) -> Outcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match source.build_sample(id, shell_only) {
                Ok(sample) => return Outcome::Resolved(sample),
                Err(err) => err,
            };
            if !err.is_retryable() {
                info!(id, "no data on card, quarantined");
                return Outcome::Unresolved(Unresolved::NoData);
            }
            warn!(id, attempt, %err, "sample attempt failed");
            if let Err(discard_err) = source.discard_partial(id, shell_only) {
                warn!(id, %discard_err, "could not discard partial artifacts");
            }
            if attempt >= self.retry.max_attempts {
                return Outcome::Unresolved(Unresolved::Exhausted {
                    attempts: attempt,
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
            }
            thread::sleep(self.retry.delay_after(attempt));
        }
    }
}
