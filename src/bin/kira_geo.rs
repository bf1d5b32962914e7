use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_geo_cache::app::{
    Engine, ProgressSink, SampleOptions, SampleSummary, SeriesOptions, SeriesSummary,
};
use kira_geo_cache::config::{ConfigLoader, ResolvedConfig};
use kira_geo_cache::decode::CommandIdatDecoder;
use kira_geo_cache::domain::{ArtifactRef, PopulationMode, SampleAccession, SeriesAccession};
use kira_geo_cache::error::KiraError;
use kira_geo_cache::geo::GeoHttpClient;
use kira_geo_cache::ingest::TitleMatching;
use kira_geo_cache::output::{
    JsonOutput, LogProgress, OutputMode, print_sample_summary, print_series_summary,
};

#[derive(Parser)]
#[command(name = "kira-geo")]
#[command(about = "Fetch, classify and cache GEO samples and series with their measurement data")]
#[command(version, author)]
struct Cli {
    /// Path to a kira-geo.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print JSON on stdout and suppress progress logging.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch (or load from cache) a single GSM sample")]
    Sample(SampleArgs),
    #[command(about = "Fetch (or load from cache) a GSE series and its samples")]
    Series(SeriesArgs),
    #[command(about = "Print the flattened per-sample info table of a series as CSV")]
    InfoTable(InfoTableArgs),
    #[command(about = "Remove the cache entry of a sample or series")]
    Evict(EvictArgs),
}

#[derive(Args)]
struct SampleArgs {
    accession: String,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    shell_only: bool,
}

#[derive(Args)]
struct SeriesArgs {
    accession: String,

    /// per_sample or supplementary
    #[arg(long, default_value = "per_sample")]
    mode: String,

    /// Supplementary artifact: URL, file name, or 1-based index.
    #[arg(long)]
    artifact: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    shell_only: bool,

    /// Keep per-sample cache entries after the series is stored.
    #[arg(long)]
    keep_sample_caches: bool,

    /// Fail when a tabular column matches no sample title.
    #[arg(long)]
    strict_titles: bool,
}

#[derive(Args)]
struct InfoTableArgs {
    accession: String,
}

#[derive(Args)]
struct EvictArgs {
    accession: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InvalidSampleAccession(_)
        | KiraError::InvalidSeriesAccession(_)
        | KiraError::InvalidMode(_)
        | KiraError::ArtifactSelection(_)
        | KiraError::SampleNotFound { .. }
        | KiraError::NotCached(_)
        | KiraError::InvalidCacheKey(_)
        | KiraError::NoDataAvailable(_) => 2,
        KiraError::NetworkFetch { .. }
        | KiraError::GeoStatus { .. }
        | KiraError::MissingTool(_)
        | KiraError::Decode(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &LogProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    match cli.command {
        Commands::Sample(args) => {
            let id: SampleAccession = args.accession.parse()?;
            let engine = build_engine(resolved)?;
            let sample = engine.sample(
                &id,
                SampleOptions {
                    overwrite: args.overwrite,
                    shell_only: args.shell_only,
                },
                sink,
            )?;
            let summary = SampleSummary::from(&sample);
            match output_mode {
                OutputMode::Interactive => print_sample_summary(&summary),
                OutputMode::NonInteractive => JsonOutput::print_sample(&summary).into_diagnostic()?,
            }
            Ok(())
        }
        Commands::Series(args) => {
            let id: SeriesAccession = args.accession.parse()?;
            let artifact = args
                .artifact
                .as_deref()
                .map(str::parse::<ArtifactRef>)
                .transpose()?;
            let options = SeriesOptions {
                mode: PopulationMode::parse(&args.mode, artifact)?,
                workers: args.workers,
                overwrite: args.overwrite,
                shell_only: args.shell_only,
                remove_sample_caches: args.keep_sample_caches.then_some(false),
                matching: if args.strict_titles {
                    TitleMatching::Strict
                } else {
                    TitleMatching::Lenient
                },
            };
            let engine = build_engine(resolved)?;
            let outcome = engine.series(&id, options, sink)?;
            let summary = SeriesSummary::from(&outcome);
            match output_mode {
                OutputMode::Interactive => print_series_summary(&summary),
                OutputMode::NonInteractive => JsonOutput::print_series(&summary).into_diagnostic()?,
            }
            Ok(())
        }
        Commands::InfoTable(args) => {
            let id: SeriesAccession = args.accession.parse()?;
            let engine = build_engine(resolved)?;
            let table = engine.sample_info_table(&id, sink)?;
            JsonOutput::print_info_table(&table).into_diagnostic()?;
            Ok(())
        }
        Commands::Evict(args) => {
            let id = match args.accession.parse::<SampleAccession>() {
                Ok(sample) => sample.as_str().to_string(),
                Err(_) => args.accession.parse::<SeriesAccession>()?.as_str().to_string(),
            };
            let engine = build_engine(resolved)?;
            let result = engine.evict(&id)?;
            match output_mode {
                OutputMode::Interactive => {
                    if result.evicted {
                        println!("evicted {}", result.id);
                    } else {
                        println!("{} was not cached", result.id);
                    }
                }
                OutputMode::NonInteractive => JsonOutput::print_evict(&result).into_diagnostic()?,
            }
            Ok(())
        }
    }
}

fn build_engine(
    resolved: ResolvedConfig,
) -> Result<Engine<GeoHttpClient, CommandIdatDecoder>, KiraError> {
    let client = GeoHttpClient::new(&resolved.query_base_url, resolved.timeout)?;
    let decoder = CommandIdatDecoder::new(
        &resolved.decoder.program,
        resolved.decoder.args.clone(),
    );
    Ok(Engine::new(resolved, client, decoder))
}
