//! CLI interface
//!
//! Command-line surface using clap's derive API: one-off queries, scenario
//! comparisons, and memory-store inspection.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Memory-augmented seller-analytics agent
#[derive(Parser, Debug)]
#[command(name = "mnemo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a single query
    Run {
        /// The question to answer
        query: String,

        /// Memory mode: baseline, read, readwrite, readwrite_cache
        #[arg(long, default_value = "readwrite")]
        mode: String,

        /// User identifier scoping learned memory
        #[arg(long, default_value = "demo")]
        user: String,
    },

    /// Replay a scenario file across memory configurations
    Scenario {
        /// Path to the scenario JSON file
        file: PathBuf,

        /// Comma-separated memory modes to compare
        #[arg(long, default_value = "baseline,readwrite_cache")]
        configs: String,

        /// Number of passes per configuration
        #[arg(long, default_value = "1")]
        repeat: usize,

        /// Write the report JSON here (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// User identifier scoping learned memory
        #[arg(long, default_value = "demo")]
        user: String,
    },

    /// Show memory-store item counts by scope and kind
    MemoryStats,
}
