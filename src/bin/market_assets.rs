use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use directories::BaseDirs;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use market_assets::app::{App, ProgressSink};
use market_assets::config::{ConfigResolver, PipelineConfig};
use market_assets::error::{AssetError, ErrorStage};
use market_assets::http::HttpTransport;
use market_assets::output::{ConsoleProgress, JsonOutput, OutputMode, print_assemble_summary};

#[derive(Parser)]
#[command(name = "market-assets")]
#[command(about = "Fetch and assemble the local market-data asset store")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Base directory for downloads and the asset store")]
    data_dir: Option<Utf8PathBuf>,

    #[arg(
        long,
        global = true,
        default_value = "market-assets.json",
        help = "Settings JSON holding the source URLs"
    )]
    config: PathBuf,

    #[arg(long, global = true, help = "Print results as JSON instead of progress text")]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the data directory and install the browser driver")]
    Setup,
    #[command(about = "Fetch all sources and write the asset store (default)")]
    Assemble,
    #[command(about = "Install the browser driver only")]
    Driver,
    #[command(about = "Download and unpack the algoseek bundle")]
    Algoseek,
    #[command(about = "List the tables held by an existing asset store")]
    Inspect,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AssetError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AssetError) -> u8 {
    match error.stage() {
        ErrorStage::Config => 2,
        ErrorStage::Fetch => 3,
        ErrorStage::Extraction => 4,
        ErrorStage::Normalization => 5,
        ErrorStage::Other => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config = PipelineConfig::new(data_dir, cli.config);
    let timeout = timeout_from(&config.resolver())?;
    let transport = HttpTransport::new(timeout)?;
    let app = App::new(config, transport);

    let console = ConsoleProgress::new();
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Console => &console,
        OutputMode::Json => &JsonOutput,
    };

    match cli.command.unwrap_or(Commands::Assemble) {
        Commands::Setup => {
            let result = app.setup(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_setup(&result).into_diagnostic()?,
                OutputMode::Console => {
                    println!("Data directory {} ready", result.data_dir);
                    println!("Driver {:?} at {}", result.driver, result.driver_path);
                }
            }
        }
        Commands::Assemble => {
            let result = app.assemble(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_assemble(&result).into_diagnostic()?,
                OutputMode::Console => print_assemble_summary(&result),
            }
        }
        Commands::Driver => {
            let status = app.install_driver(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_driver(&status).into_diagnostic()?,
                OutputMode::Console => println!("Driver {status:?}"),
            }
        }
        Commands::Algoseek => {
            let result = app.download_algoseek(sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_download(&result).into_diagnostic()?,
                OutputMode::Console if result.downloaded => {
                    println!("Downloaded and unpacked {}", result.path);
                }
                OutputMode::Console => println!("{} already present", result.path),
            }
        }
        Commands::Inspect => {
            let result = app.inspect()?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_inspect(&result).into_diagnostic()?,
                OutputMode::Console => {
                    println!("{} (created {})", result.store_path, result.created_at);
                    for table in &result.tables {
                        println!(
                            "  {:<20} {:>10} rows  index={:?} columns={:?}",
                            table.key, table.rows, table.index, table.columns
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn default_data_dir() -> miette::Result<Utf8PathBuf> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_dir().join("market-assets")).ok()
        })
        .ok_or_else(|| miette::Report::msg("unable to resolve a default data directory"))
}

// A missing settings file is reported by the command that needs it.
fn timeout_from(resolver: &ConfigResolver) -> Result<Option<Duration>, AssetError> {
    match resolver.timeout_secs() {
        Ok(secs) => Ok(secs.map(Duration::from_secs)),
        Err(AssetError::MissingConfig(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
