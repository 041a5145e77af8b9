//! Command-line interface parsing for swrcache
//!
//! This module handles parsing of CLI arguments using clap. Each subcommand
//! drives one of the cache demos against a simulated producer.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::cache::MAX_TTL;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// Failure rate outside 0..=1
    #[error("Invalid failure rate: {0}. Expected a value between 0 and 1")]
    InvalidFailureRate(f64),

    /// Page size of zero
    #[error("Page size must be greater than zero")]
    ZeroPageSize,

    /// Feed interval of zero
    #[error("Feed interval must be greater than zero")]
    ZeroInterval,

    /// Duration flag longer than the cache can hold
    #[error("Invalid {flag}: {value}. Expected at most {max} milliseconds")]
    DurationTooLong {
        flag: &'static str,
        value: u64,
        max: u128,
    },

    /// Negative or non-finite volatility
    #[error("Invalid volatility: {0}. Expected a finite value of at least 0")]
    InvalidVolatility(f64),

    /// Symbol without a usable starting price
    #[error("Invalid symbol '{0}'. Expected SYMBOL=PRICE with a positive price")]
    InvalidSymbol(String),
}

/// swrcache - stale-while-revalidate cache demos
#[derive(Parser, Debug)]
#[command(name = "swrcache")]
#[command(about = "In-memory TTL cache with stale-while-revalidate, driven by simulated producers")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file (defaults to the XDG config location)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve one key repeatedly against a slow, flaky producer
    Resolve(ResolveArgs),
    /// Page through a simulated listing collection
    Paginate(PaginateArgs),
    /// Run the simulated price feed and read prices from the cache
    Feed(FeedArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Cache key to resolve
    #[arg(long, default_value = "token_balance")]
    pub key: String,

    /// Number of resolve calls
    #[arg(long, default_value_t = 5)]
    pub requests: u32,

    /// Pause between resolve calls, in milliseconds
    #[arg(long, default_value_t = 400)]
    pub spacing_ms: u64,

    /// Simulated producer latency, in milliseconds
    #[arg(long, default_value_t = 150)]
    pub latency_ms: u64,

    /// TTL override in milliseconds (defaults to the configured TTL)
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Probability that a producer call fails
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Wait for the producer instead of serving stale values
    #[arg(long)]
    pub no_swr: bool,

    /// Seed for the simulated failures
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print cache stats as JSON when done
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PaginateArgs {
    /// Key prefix for cached pages
    #[arg(long, default_value = "listings")]
    pub prefix: String,

    /// Number of items in the simulated collection
    #[arg(long, default_value_t = 50)]
    pub total: usize,

    /// Items per page
    #[arg(long, default_value_t = 10)]
    pub page_size: usize,

    /// Simulated latency per page, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub latency_ms: u64,

    /// Print cache stats as JSON when done
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// Number of ticks to run
    #[arg(long, default_value_t = 5)]
    pub ticks: u64,

    /// Tick interval in milliseconds
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Maximum relative move per tick
    #[arg(long, default_value_t = 0.02)]
    pub volatility: f64,

    /// Symbols to simulate, as SYMBOL=PRICE
    #[arg(long = "symbol", value_name = "SYMBOL=PRICE")]
    pub symbols: Vec<String>,

    /// Seed for the random walk
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print cache stats as JSON when done
    #[arg(long)]
    pub stats: bool,
}

impl ResolveArgs {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

impl FeedArgs {
    /// Parses `--symbol` values into (symbol, starting price) pairs
    pub fn parse_symbols(&self) -> Result<Vec<(String, f64)>, CliError> {
        self.symbols.iter().map(|s| parse_symbol_arg(s)).collect()
    }
}

fn check_duration_ms(flag: &'static str, value: u64, max: Duration) -> Result<(), CliError> {
    if u128::from(value) > max.as_millis() {
        return Err(CliError::DurationTooLong {
            flag,
            value,
            max: max.as_millis(),
        });
    }
    Ok(())
}

/// Parses a `SYMBOL=PRICE` argument
pub fn parse_symbol_arg(s: &str) -> Result<(String, f64), CliError> {
    let invalid = || CliError::InvalidSymbol(s.to_string());
    let (symbol, price) = s.split_once('=').ok_or_else(invalid)?;
    let symbol = symbol.trim();
    let price: f64 = price.trim().parse().map_err(|_| invalid())?;

    if symbol.is_empty() || !price.is_finite() || price <= 0.0 {
        return Err(invalid());
    }
    Ok((symbol.to_uppercase(), price))
}

impl Cli {
    /// Checks argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), CliError> {
        match &self.command {
            Command::Resolve(args) => {
                if !(0.0..=1.0).contains(&args.failure_rate) {
                    return Err(CliError::InvalidFailureRate(args.failure_rate));
                }
                if let Some(ttl_ms) = args.ttl_ms {
                    check_duration_ms("--ttl-ms", ttl_ms, MAX_TTL)?;
                }
            }
            Command::Paginate(args) => {
                if args.page_size == 0 {
                    return Err(CliError::ZeroPageSize);
                }
            }
            Command::Feed(args) => {
                if args.interval_ms == 0 {
                    return Err(CliError::ZeroInterval);
                }
                // Prices are cached for two intervals
                check_duration_ms("--interval-ms", args.interval_ms, MAX_TTL / 2)?;
                if !args.volatility.is_finite() || args.volatility < 0.0 {
                    return Err(CliError::InvalidVolatility(args.volatility));
                }
                args.parse_symbols()?;
            }
        }
        Ok(())
    }
}
