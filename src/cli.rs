use clap::Parser;
use std::path::PathBuf;

/// Headless reel feed simulator: scrolls a synthetic feed through the
/// player pool and prints trace events and pool statistics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON feed config (overrides REELPOOL_CONFIG)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override pool capacity from the config
    #[arg(long = "pool", value_name = "N")]
    pub pool_capacity: Option<usize>,

    /// Total items available from the simulated backend
    #[arg(long = "items", value_name = "N", default_value_t = 30)]
    pub items: usize,

    /// Items delivered per page fetch
    #[arg(long = "page-size", value_name = "N", default_value_t = 10)]
    pub page_size: usize,

    /// Number of forward swipes to simulate
    #[arg(short = 's', long = "swipes", value_name = "N", default_value_t = 20)]
    pub swipes: usize,

    /// Time spent on each item before swiping on
    #[arg(long = "dwell-ms", value_name = "MS", default_value_t = 150)]
    pub dwell_ms: u64,

    /// Simulated load latency (network + decoder)
    #[arg(long = "latency-ms", value_name = "MS", default_value_t = 100)]
    pub latency_ms: u64,

    /// Fail every n-th load (0 = never)
    #[arg(long = "fail-every", value_name = "N", default_value_t = 0)]
    pub fail_every: u64,

    /// Loader worker threads
    #[arg(long = "loader-threads", value_name = "N", default_value_t = 2)]
    pub loader_threads: usize,

    /// Print trace events and stats as JSON lines
    #[arg(long = "json")]
    pub json: bool,

    /// Log to file instead of stderr
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
