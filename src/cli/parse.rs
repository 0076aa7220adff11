//! CLI parse: clap types for Nattevakt. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Nattevakt CLI - scheduled night-watch news generation
#[derive(Parser)]
#[command(name = "nattevakt")]
#[command(version)]
#[command(about = "Generates, repairs and serves the Pjuskeby night-watch news feed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one generation now
    Generate {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Run generations on a fixed interval until interrupted
    Schedule {
        /// Seconds between runs (defaults to generation.schedule_interval_secs)
        #[arg(long)]
        interval: Option<u64>,
        /// Stop after this many runs
        #[arg(long)]
        runs: Option<u64>,
    },
    /// Show recent journal entries
    Errors {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Clear the journal
    ClearLogs,
    /// Check data sources and the news artifact
    Check {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Repair data sources and the news artifact
    Fix {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show service status and health
    Status {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the public news feed
    Feed {
        /// Number of items (1-50)
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print where configuration is read from
    Paths,
}
