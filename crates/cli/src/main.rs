//! ostester CLI - Main Entry Point
//!
//! Runs stage files against a QEMU VM and checks them offline.

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod output;

use commands::{check, run};

/// ostester - drive a VM through scripted screens
#[derive(Parser)]
#[command(name = "ostester")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Log format
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stage file against a VM
    Run(run::RunArgs),

    /// Validate a stage file and its reference images
    Check(check::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    debug!("ostester v{}", ostester_common::VERSION);

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await,
        Commands::Check(args) => check::execute(args, cli.format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(commands::exit_code_for(&e));
    }

    Ok(())
}
