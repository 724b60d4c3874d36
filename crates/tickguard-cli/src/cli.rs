//! CLI argument definitions for tickguard.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Fetch quotes or history through the resilient pipeline |
//! | `health` | Probe endpoints and print breaker/health status |
//! | `config` | Print the effective configuration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file, env overrides applied on top |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat stale or empty results as failures |
//! | `--timeout-ms` | none | Overall deadline per fetched resource |
//!
//! # Examples
//!
//! ```bash
//! tickguard fetch 510300 159915 --pretty
//! tickguard fetch 510300 --kind daily-history --param start=2024-01-01 --param adjust=qfq
//! tickguard health --probe 510300 --report health.json
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tickguard_core::{CacheMode, QueryKind};

/// Resilient market data fetching across free providers.
#[derive(Debug, Parser)]
#[command(
    name = "tickguard",
    author,
    version,
    about = "Resilient multi-provider market data CLI"
)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Fail (exit code 5) when any result is stale or empty.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Overall deadline in milliseconds for each fetched resource.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch data for one or more resource ids.
    ///
    /// # Examples
    ///
    ///   tickguard fetch 510300
    ///   tickguard fetch sz159915 --kind intraday --param period=5
    Fetch(FetchArgs),

    /// Print per-endpoint breaker and health status.
    Health(HealthArgs),

    /// Print the effective configuration after file and env overrides.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    DailyHistory,
    SpotQuote,
    Intraday,
}

impl From<KindArg> for QueryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::DailyHistory => Self::DailyHistory,
            KindArg::SpotQuote => Self::SpotQuote,
            KindArg::Intraday => Self::Intraday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheModeArg {
    Use,
    Refresh,
    Bypass,
}

impl From<CacheModeArg> for CacheMode {
    fn from(mode: CacheModeArg) -> Self {
        match mode {
            CacheModeArg::Use => Self::Use,
            CacheModeArg::Refresh => Self::Refresh,
            CacheModeArg::Bypass => Self::Bypass,
        }
    }
}

/// Arguments for the `fetch` command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Resource ids such as `510300`, `sh510300` or `sz159915`.
    #[arg(required = true, num_args = 1..)]
    pub resource_ids: Vec<String>,

    #[arg(long, value_enum, default_value_t = KindArg::SpotQuote)]
    pub kind: KindArg,

    /// Extra query parameter as `name=value` (`start`, `end`, `adjust`, `period`, `limit`).
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    #[arg(long, value_enum, default_value_t = CacheModeArg::Use)]
    pub cache_mode: CacheModeArg,
}

/// Arguments for the `health` command.
#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Resource ids fetched first so the report reflects live traffic.
    #[arg(long = "probe", value_name = "RESOURCE_ID")]
    pub probes: Vec<String>,

    #[arg(long, value_enum, default_value_t = KindArg::SpotQuote)]
    pub kind: KindArg,

    /// Also write the full JSON health report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,
}
