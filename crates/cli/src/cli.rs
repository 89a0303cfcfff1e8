//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Media Relay - fetch, store and analyze a batch of media ids
#[derive(Parser, Debug)]
#[command(
    name = "media-relay",
    author,
    version,
    about = "Batch media pipeline: fetch -> transfer -> analyze",
    long_about = "Moves every input id through fetch, transfer to a store and a\n\
                  long-running analysis job, with bounded workers per stage,\n\
                  retries, a live status display and a failed-id report."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MEDIA_RELAY_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "MEDIA_RELAY_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log level from -v/-q (`RUST_LOG` still wins)
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Prometheus port requested by the command, if any
    pub fn metrics_port(&self) -> Option<u16> {
        match &self.command {
            Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
            _ => None,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch through the pipeline
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when omitted
    #[arg(short, long, env = "MEDIA_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Media id to process (repeatable, comma separated accepted)
    #[arg(short, long = "id", value_delimiter = ',')]
    pub ids: Vec<String>,

    /// File with one id per line (`#` comments and blank lines ignored)
    #[arg(long, env = "MEDIA_RELAY_ID_FILE")]
    pub id_file: Option<PathBuf>,

    /// Adapter family to use
    #[arg(long, value_enum, env = "MEDIA_RELAY_ADAPTER")]
    pub adapter: Option<AdapterArg>,

    /// Override the local source directory
    #[arg(long, env = "MEDIA_RELAY_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Directory for failed_ids.txt
    #[arg(short, long, default_value = ".", env = "MEDIA_RELAY_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Keep fetched files after a successful transfer
    #[arg(long)]
    pub keep: bool,

    /// Fetch workers
    #[arg(long, env = "MEDIA_RELAY_FETCH_WORKERS")]
    pub fetch_workers: Option<usize>,

    /// Transfer workers
    #[arg(long, env = "MEDIA_RELAY_TRANSFER_WORKERS")]
    pub transfer_workers: Option<usize>,

    /// Analysis submit workers
    #[arg(long, env = "MEDIA_RELAY_ANALYZE_WORKERS")]
    pub analyze_workers: Option<usize>,

    /// Delay between status queries of one job (milliseconds)
    #[arg(long, env = "MEDIA_RELAY_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Whole-batch timeout in seconds (0 = no timeout)
    #[arg(long, env = "MEDIA_RELAY_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Disable the live status display
    #[arg(long)]
    pub no_status: bool,

    /// Write a JSON report of the run to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Validate configuration and ids, then exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MEDIA_RELAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show retry policy of every stage
    #[arg(long)]
    pub retry: bool,

    /// Show adapter settings
    #[arg(long)]
    pub adapters: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

/// Adapter family
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterArg {
    /// Directory-backed fetch and store, simulated analysis
    Local,
    /// Everything simulated in memory
    Simulated,
}

impl From<AdapterArg> for contracts::AdapterKind {
    fn from(arg: AdapterArg) -> Self {
        match arg {
            AdapterArg::Local => contracts::AdapterKind::Local,
            AdapterArg::Simulated => contracts::AdapterKind::Simulated,
        }
    }
}
