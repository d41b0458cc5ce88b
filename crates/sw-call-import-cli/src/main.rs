//! sw-call-import CLI - Supportworks to Hornbill Service Manager call import.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use sw_call_import::{Config, ImportError, ImportSummary, Orchestrator};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "sw-call-import")]
#[command(about = "Import Supportworks calls into Hornbill Service Manager")]
#[command(version)]
struct Cli {
    /// Path to JSON or YAML configuration file
    #[arg(short, long, default_value = "conf.json", global = true)]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Directory the run log file is written to
    #[arg(long, default_value = "log", global = true)]
    log_dir: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import calls
    Run {
        /// Number of concurrent workers (1-10)
        #[arg(long, default_value = "1")]
        concurrent: usize,

        /// Build every request but write nothing to the instance
        #[arg(long)]
        dry_run: bool,

        /// Output JSON summary to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Test database connections and instance logon
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ImportError> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _guard = setup_logging(&cli.log_dir, &cli.log_format, cli.debug)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            concurrent,
            dry_run,
            output_json,
        } => {
            let orchestrator = Orchestrator::new(config, concurrent, dry_run).await?;
            let summary = orchestrator.run().await?;
            if output_json {
                println!("{}", summary.to_json()?);
            } else {
                print_summary(&summary);
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config, 1, true).await?;
            orchestrator.health_check().await?;
            println!("Health check passed");
        }
    }

    Ok(())
}

fn print_summary(summary: &ImportSummary) {
    let status_msg = if summary.dry_run { "Dry run completed!" } else { "Import completed!" };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", summary.run_id);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Requests created: {}", summary.created);
    println!("  Requests skipped: {}", summary.skipped);
    println!("  Existing requests: {}", summary.existing);
    println!("  Files attached: {}", summary.files_attached);
    println!("  Associations linked: {}", summary.associations_linked);
}

/// Log to stdout and to `SW_Call_Import_<timestamp>.log` under `log_dir`.
fn setup_logging(log_dir: &Path, format: &str, debug: bool) -> Result<WorkerGuard, ImportError> {
    std::fs::create_dir_all(log_dir)?;
    let file_name = format!(
        "SW_Call_Import_{}.log",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    );
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layers = if format == "json" {
        vec![
            fmt::layer().json().with_target(false).boxed(),
            fmt::layer().json().with_writer(writer).boxed(),
        ]
    } else {
        vec![
            fmt::layer().with_target(false).boxed(),
            fmt::layer().with_ansi(false).with_writer(writer).boxed(),
        ]
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| ImportError::Config(e.to_string()))?;

    Ok(guard)
}
