use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{EvictResult, ProgressEvent, ProgressSink, SampleSummary, SeriesSummary};
use crate::entity::InfoTable;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sample(result: &SampleSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_series(result: &SeriesSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_evict(result: &EvictResult) -> io::Result<()> {
        Self::print_json(result)
    }

    /// Info tables go out as CSV, the same form they are cached in.
    pub fn print_info_table(table: &InfoTable) -> io::Result<()> {
        let stdout = io::stdout();
        table
            .write_csv(stdout.lock())
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber on stderr.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub fn print_series_summary(summary: &SeriesSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}{} ({}){reset}", summary.id, summary.source);
    if let Some(title) = &summary.title {
        println!("  {title}");
    }
    println!(
        "{green}  samples: {} of {} members, {} with data{reset}",
        summary.samples, summary.members, summary.samples_with_data
    );
    if let Some(report) = &summary.ingest {
        println!(
            "{green}  {}: {} attached{reset}",
            report.artifact,
            report.attached.len()
        );
        for column in &report.unmatched_columns {
            println!("{yellow}  unmatched column: {column}{reset}");
        }
    }
    for (id, reason) in &summary.unresolved {
        println!("{yellow}  unresolved {id}: {reason}{reset}");
    }
}

pub fn print_sample_summary(summary: &SampleSummary) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    println!(
        "{cyan}{} ({}, series {}){reset}",
        summary.id, summary.platform_id, summary.series_id
    );
    println!(
        "  status: {}, probes: {}, characteristics: {}",
        summary.data_status, summary.probes, summary.characteristics
    );
}
