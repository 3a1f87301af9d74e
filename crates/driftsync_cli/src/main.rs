//! Driftsync CLI
//!
//! Operator tools for a driftsync file store's sync queue.
//!
//! # Commands
//!
//! - `status` - Sync queue counts by status and the oldest pending row
//! - `list` - List sync queue rows
//! - `retry` - Put a dead row back in line
//! - `discard` - Delete a row without syncing it
//! - `prune` - Delete old synced rows

mod commands;

use clap::{Parser, Subcommand};
use commands::{CliError, CliResult, Format};
use driftsync_store::SyncStatus;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Driftsync sync queue tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync queue counts
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List sync queue rows, oldest first
    List {
        /// Only rows with this status (pending, synced, dead)
        #[arg(short, long)]
        status: Option<String>,

        /// Only rows of this model type
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Make a dead or pending row due now with attempts reset
    Retry {
        /// Row id
        id: u64,
    },

    /// Delete a row without syncing it
    Discard {
        /// Row id
        id: u64,
    },

    /// Delete synced rows
    Prune {
        /// Only rows last updated more than this many hours ago
        #[arg(long, default_value = "24")]
        older_than_hours: u64,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out).await?;
    out.flush()?;
    Ok(())
}

async fn run(cli: Cli, out: &mut dyn Write) -> CliResult<()> {
    let open = |command: &'static str| {
        let path = cli.path.as_deref().ok_or(CliError::MissingPath(command))?;
        commands::open_store(path)
    };

    match &cli.command {
        Commands::Status { format } => {
            let store = open("status")?;
            commands::status::run(&store, format.parse()?, out).await
        }
        Commands::List {
            status,
            model,
            limit,
            format,
        } => {
            let status = status
                .as_deref()
                .map(str::parse::<SyncStatus>)
                .transpose()
                .map_err(CliError::InvalidArgument)?;
            let format: Format = format.parse()?;
            let store = open("list")?;
            commands::list::run(&store, status, model.as_deref(), *limit, format, out).await
        }
        Commands::Retry { id } => {
            let store = open("retry")?;
            commands::retry::run(&store, *id, out).await
        }
        Commands::Discard { id } => {
            let store = open("discard")?;
            commands::discard::run(&store, *id, out).await
        }
        Commands::Prune {
            older_than_hours,
            dry_run,
        } => {
            let store = open("prune")?;
            commands::prune::run(&store, *older_than_hours, *dry_run, out).await
        }
        Commands::Version => {
            writeln!(out, "Driftsync CLI v{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
    }
}
