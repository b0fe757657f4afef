use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mof_harvester::app::{App, ProgressSink};
use mof_harvester::catalog::{Catalog, CatalogHttpClient};
use mof_harvester::config::{ConfigLoader, ResolvedConfig};
use mof_harvester::domain::CollectionSelection;
use mof_harvester::error::MofError;
use mof_harvester::output::{ConsoleOutput, JsonOutput, OutputMode};
use mof_harvester::store::Layout;

#[derive(Parser)]
#[command(name = "mof-harvest")]
#[command(about = "Download MOF records, extract adsorption isotherms and curate them")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List catalog collections and local availability")]
    Collections,
    #[command(about = "Download records and structure files")]
    Fetch(StageArgs),
    #[command(about = "Extract isotherm tables from downloaded records")]
    Extract(StageArgs),
    #[command(about = "Keep tables with a surface area and write a summary")]
    Clean(StageArgs),
    #[command(about = "Fetch, extract and clean in one go")]
    Run(StageArgs),
}

#[derive(Args)]
struct StageArgs {
    /// Collection indices, e.g. `0,2`, or `all`.
    #[arg(long)]
    select: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MofError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MofError) -> u8 {
    match error {
        MofError::InvalidSelection(_)
        | MofError::ConfigRead(_)
        | MofError::ConfigParse(_)
        | MofError::InvalidConfig(_) => 2,
        MofError::CatalogHttp(_) | MofError::CatalogStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;

    let client = CatalogHttpClient::new(&config.base_url, config.request_timeout)?;
    let catalog = Catalog::new(client, config.paging);
    let app = App::new(
        catalog,
        Layout::new(config.data_dir.clone()),
        config.workers,
        &config.summary_file,
    );
    let sink: &dyn ProgressSink = match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Console => &ConsoleOutput,
    };

    match cli.command {
        Commands::Collections => {
            let result = app.collections(sink);
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_collections(&result),
            }
        }
        Commands::Fetch(args) => {
            let selection = resolve_selection(&app, args.select, mode)?;
            let result = app.fetch(&selection, sink)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_fetch(&result),
            }
        }
        Commands::Extract(args) => {
            let selection = resolve_selection(&app, args.select, mode)?;
            let result = app.extract(&selection, sink)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_extract(&result),
            }
        }
        Commands::Clean(args) => {
            let selection = resolve_selection(&app, args.select, mode)?;
            let result = app.clean(&selection, sink)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_clean(&result),
            }
        }
        Commands::Run(args) => {
            let selection = resolve_selection(&app, args.select, mode)?;
            let result = app.run(&selection, sink)?;
            match mode {
                OutputMode::Json => JsonOutput::print(&result).into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_run(&result),
            }
        }
    }
    Ok(())
}

fn apply_overrides(config: &mut ResolvedConfig, cli: &Cli) -> miette::Result<()> {
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Utf8PathBuf::from(dir);
    }
    if let Some(url) = &cli.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(workers) = cli.workers {
        if workers == 0 {
            return Err(MofError::InvalidConfig("workers must be positive".to_string()).into());
        }
        config.workers = workers;
    }
    Ok(())
}

/// Uses `--select` when given; in console mode asks on stdin otherwise.
fn resolve_selection(
    app: &App<CatalogHttpClient>,
    select: Option<String>,
    mode: OutputMode,
) -> miette::Result<CollectionSelection> {
    if let Some(value) = select {
        return parse_selection(&value);
    }
    if matches!(mode, OutputMode::Json) {
        let error = MofError::InvalidSelection("--select is required with --json".to_string());
        return Err(error.into());
    }

    ConsoleOutput::print_collections(&app.collections(&ConsoleOutput));
    print!("Enter collection indices (e.g. 0,2 or 'all'): ");
    io::stdout().flush().into_diagnostic()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).into_diagnostic()?;
    parse_selection(&line)
}

/// Keeps the `MofError` inside the report so `main` can map its exit code.
fn parse_selection(value: &str) -> miette::Result<CollectionSelection> {
    Ok(value.parse::<CollectionSelection>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_code(report: &miette::Report) -> Option<u8> {
        report.downcast_ref::<MofError>().map(map_exit_code)
    }

    #[test]
    fn invalid_selection_exits_with_usage_code() {
        let report = parse_selection("x,y").unwrap_err();
        assert_eq!(exit_code(&report), Some(2));
    }

    #[test]
    fn zero_workers_override_exits_with_usage_code() {
        let cli = Cli::parse_from(["mof-harvest", "--workers", "0", "collections"]);
        let mut config = ConfigLoader::resolve_config(Default::default()).unwrap();
        let report = apply_overrides(&mut config, &cli).unwrap_err();
        assert_eq!(exit_code(&report), Some(2));
    }

    #[test]
    fn catalog_errors_exit_with_network_code() {
        let report = miette::Report::from(MofError::CatalogStatus {
            status: 503,
            message: "busy".to_string(),
        });
        assert_eq!(exit_code(&report), Some(3));
    }
}
