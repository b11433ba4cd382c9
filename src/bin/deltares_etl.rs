use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deltares_stac_etl::batch::{BatchDriver, PoolBounds, discover_sources, parse_url_list};
use deltares_stac_etl::catalog::{create_collection, create_item, parse_extra_fields};
use deltares_stac_etl::config::{ConfigLoader, ResolvedConfig};
use deltares_stac_etl::dataset::DatasetReader;
use deltares_stac_etl::domain::{DatasetKind, UrlParser};
use deltares_stac_etl::error::EtlError;
use deltares_stac_etl::fetch::{HttpFetcher, SourceFetcher};
use deltares_stac_etl::output::{JsonOutput, LogSink, OutputMode, print_summary};
use deltares_stac_etl::references::CommandReferenceBuilder;
use deltares_stac_etl::storage::{AzureBlobClient, LocalBlobStore, write_bytes_atomic};
use deltares_stac_etl::workflow::{ItemProcessor, Pipeline, ProgressSink, WorkflowOptions};

const NETCDF_HELP: &str =
    "Reading NetCDF needs a build with `--features netcdf` (links the system libnetcdf).";

#[derive(Parser)]
#[command(name = "deltares-etl")]
#[command(about = "Kerchunk references and STAC items for the Deltares NetCDF datasets")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, value_enum)]
    kind: Option<DatasetKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process every discovered source file")]
    #[command(after_help = NETCDF_HELP)]
    Run(RunArgs),
    #[command(about = "Process a single source URL")]
    #[command(after_help = NETCDF_HELP)]
    Process(ProcessArgs),
    #[command(about = "Write the STAC item for one source file")]
    #[command(after_help = NETCDF_HELP)]
    CreateItem(CreateItemArgs),
    #[command(about = "Write the STAC collection for the dataset kind")]
    CreateCollection(CreateCollectionArgs),
    #[command(about = "List discovered source URLs")]
    List,
}

#[derive(Args, Clone)]
struct TargetArgs {
    #[arg(long)]
    force: bool,

    #[arg(long)]
    local_output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    min_workers: Option<usize>,

    #[arg(long)]
    max_workers: Option<usize>,

    /// Newline-separated source URLs instead of listing the source container.
    #[arg(long)]
    urls: Option<PathBuf>,
}

#[derive(Args)]
struct ProcessArgs {
    url: String,

    #[command(flatten)]
    target: TargetArgs,
}

#[derive(Args)]
struct CreateItemArgs {
    /// Source URL, or a local NetCDF path together with `--url`.
    source: String,

    destination: Utf8PathBuf,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    references: Option<String>,
}

#[derive(Args)]
struct CreateCollectionArgs {
    destination: Utf8PathBuf,

    #[arg(long = "extra-field")]
    extra_fields: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<EtlError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::ConfigRead(_)
        | EtlError::ConfigParse(_)
        | EtlError::InvalidConfig(_)
        | EtlError::MissingCredential(_)
        | EtlError::MalformedSourceUrl(_) => 2,
        EtlError::MissingTool(_) => 3,
        error if error.is_remote() => 3,
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
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &LogSink,
        OutputMode::NonInteractive => &JsonOutput,
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref(), cli.kind)?;
    info!(kind = %resolved.kind, "configuration resolved");

    match cli.command {
        Commands::Run(args) => {
            let pool = PoolBounds::new(
                args.min_workers.unwrap_or(resolved.pool.minimum),
                args.max_workers.unwrap_or(resolved.pool.maximum),
            )?;
            let processor = build_processor(&resolved, &args.target)?;
            let urls = match &args.urls {
                Some(path) => read_url_list(path)?,
                None => list_sources(&resolved)?,
            };
            let options = workflow_options(&resolved, &args.target);
            let report = BatchDriver::new(pool).run(processor.as_ref(), &urls, options, sink)?;
            match output_mode {
                OutputMode::Interactive => print_summary(&report),
                OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic()?,
            }
            Ok(())
        }
        Commands::Process(args) => {
            let processor = build_processor(&resolved, &args.target)?;
            let options = workflow_options(&resolved, &args.target);
            let outcome = processor.process(&args.url, options, sink)?;
            match output_mode {
                OutputMode::Interactive => {
                    println!("{} references: {}", outcome.item_id, outcome.references_path);
                    println!("{} stac item: {}", outcome.item_id, outcome.stac_item_path);
                }
                OutputMode::NonInteractive => JsonOutput::print_item(&outcome).into_diagnostic()?,
            }
            Ok(())
        }
        Commands::CreateItem(args) => {
            let parser = UrlParser::new(&resolved.patterns)?;
            let reader = dataset_reader()?;
            let scratch = tempfile::tempdir().into_diagnostic()?;
            let (local_path, source_url) = if is_remote_source(&args.source) {
                let local_path = scratch.path().join("source.nc");
                HttpFetcher::new(resolved.sas_token())?.download(&args.source, &local_path)?;
                (local_path, args.url.unwrap_or(args.source))
            } else {
                let source_url = args.url.ok_or_else(|| {
                    EtlError::InvalidConfig("a local source needs --url".to_string())
                })?;
                (PathBuf::from(&args.source), source_url)
            };
            let dataset = reader.open(&local_path)?;
            let item = create_item(&parser, &dataset, &source_url, args.references.as_deref())?;
            write_bytes_atomic(&args.destination, &item.to_bytes()?)?;
            info!(item = %item.id, destination = %args.destination, "wrote stac item");
            Ok(())
        }
        Commands::CreateCollection(args) => {
            let extra_fields = parse_extra_fields(&args.extra_fields)?;
            let collection = create_collection(resolved.kind, extra_fields);
            write_bytes_atomic(&args.destination, &collection.to_bytes()?)?;
            info!(collection = %collection.id, destination = %args.destination, "wrote stac collection");
            Ok(())
        }
        Commands::List => {
            let urls = list_sources(&resolved)?;
            match output_mode {
                OutputMode::Interactive => {
                    for url in &urls {
                        println!("{url}");
                    }
                }
                OutputMode::NonInteractive => JsonOutput::print_urls(&urls).into_diagnostic()?,
            }
            Ok(())
        }
    }
}

fn workflow_options(resolved: &ResolvedConfig, target: &TargetArgs) -> WorkflowOptions {
    WorkflowOptions {
        overwrite: target.force || resolved.overwrite,
    }
}

fn build_processor(
    resolved: &ResolvedConfig,
    target: &TargetArgs,
) -> Result<Box<dyn ItemProcessor>, EtlError> {
    let parser = UrlParser::new(&resolved.patterns)?;
    let fetcher = HttpFetcher::new(resolved.sas_token())?;
    let reader = dataset_reader()?;
    let references = CommandReferenceBuilder::new(&resolved.reference_tool)?;
    let layout = resolved.layout.clone();

    match &target.local_output {
        Some(root) => {
            let store = LocalBlobStore::new(root.clone());
            Ok(Box::new(Pipeline::new(
                store, fetcher, reader, references, parser, layout,
            )))
        }
        None => {
            let destination = &resolved.destination;
            let store = AzureBlobClient::new(
                &destination.account_url,
                &destination.container,
                Some(destination.credential()?),
            )?;
            Ok(Box::new(Pipeline::new(
                store, fetcher, reader, references, parser, layout,
            )))
        }
    }
}

fn list_sources(resolved: &ResolvedConfig) -> Result<Vec<String>, EtlError> {
    let source = AzureBlobClient::new(
        &resolved.source.account_url,
        &resolved.source.container,
        resolved.sas_token(),
    )?;
    discover_sources(&source, &resolved.source.filter)
}

fn read_url_list(path: &Path) -> Result<Vec<String>, EtlError> {
    let content = fs::read_to_string(path)
        .map_err(|err| EtlError::Filesystem(format!("{}: {err}", path.display())))?;
    Ok(parse_url_list(&content))
}

fn is_remote_source(source: &str) -> bool {
    source.starts_with("https://") || source.starts_with("http://")
}

#[cfg(feature = "netcdf")]
fn dataset_reader() -> Result<deltares_stac_etl::netcdf_reader::NetcdfReader, EtlError> {
    Ok(deltares_stac_etl::netcdf_reader::NetcdfReader)
}

#[cfg(not(feature = "netcdf"))]
fn dataset_reader() -> Result<deltares_stac_etl::dataset::UnavailableReader, EtlError> {
    Err(deltares_stac_etl::dataset::UnavailableReader::error())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn processing_commands_mention_netcdf_feature() {
        let command = Cli::command();
        for name in ["run", "process", "create-item"] {
            let sub = command.find_subcommand(name).unwrap();
            let help = sub.get_after_help().unwrap().to_string();
            assert!(help.contains("--features netcdf"), "{name}: {help}");
        }
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn run_without_netcdf_fails_before_listing() {
        let resolved = ConfigLoader::resolve_config(Default::default(), None).unwrap();
        let target = TargetArgs {
            force: false,
            local_output: Some(Utf8PathBuf::from("unused")),
        };
        assert!(matches!(
            build_processor(&resolved, &target),
            Err(EtlError::MissingTool(_))
        ));
    }
}
