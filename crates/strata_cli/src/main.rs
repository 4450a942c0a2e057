//! StrataDB CLI
//!
//! Command-line tools for StrataDB table maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display table statistics, schema and segments
//! - `verify` - Verify that indexes and rows agree
//! - `compact` - Compact segments to reclaim space

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// StrataDB command-line table tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display table statistics and metadata
    Inspect {
        /// Path to the table directory
        path: PathBuf,

        /// Show segment details
        #[arg(short, long)]
        segments: bool,

        /// Print the first N live rows
        #[arg(short, long, default_value = "0")]
        rows: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify that every live row is reachable through every index
    Verify {
        /// Path to the table directory
        path: PathBuf,
    },

    /// Compact segments to reclaim space
    Compact {
        /// Path to the table directory
        path: PathBuf,

        /// Also merge adjacent readonly segments
        #[arg(short, long)]
        merge: bool,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            path,
            segments,
            rows,
            format,
        } => commands::inspect::run(&path, segments, rows, &format)?,
        Commands::Verify { path } => commands::verify::run(&path)?,
        Commands::Compact {
            path,
            merge,
            dry_run,
        } => commands::compact::run(&path, merge, dry_run)?,
        Commands::Version => {
            println!("StrataDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("StrataDB Core v{}", strata_core::VERSION);
        }
    }

    Ok(())
}
