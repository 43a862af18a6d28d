//! Refstore CLI
//!
//! Command-line tools for refstore snapshot files.
//!
//! # Commands
//!
//! - `inspect` - Display per-type counts and dangling references
//! - `apply` - Delete records or set fields in one transaction and print the change set

mod commands;
mod record;
mod snapshot;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Refstore command-line snapshot tools.
#[derive(Parser)]
#[command(name = "refstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the snapshot file
    #[arg(global = true, short, long)]
    snapshot: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display entity counts and dangling references
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply deletions and field updates, printing the committed change set
    Apply {
        /// Id to delete (repeatable)
        #[arg(short, long = "delete")]
        delete: Vec<String>,

        /// Field assignment `id.field=value`, `null` clears (repeatable)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Write the resulting snapshot here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Commit without repairing dangling references
        #[arg(long)]
        no_integrity: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.snapshot.ok_or("Snapshot path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Apply {
            delete,
            set,
            output,
            no_integrity,
        } => {
            let path = cli.snapshot.ok_or("Snapshot path required for apply")?;
            let options = commands::apply::ApplyOptions {
                deletes: delete,
                sets: set,
                output,
                skip_integrity: no_integrity,
            };
            commands::apply::run(&path, &options)?;
        }
        Commands::Version => {
            println!("Refstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Refstore Core v{}", refstore_core::VERSION);
        }
    }

    Ok(())
}
