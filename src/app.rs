//! Demo runners for the swrcache binary
//!
//! Each runner builds a `DataCache` from the loaded configuration and drives
//! it with a simulated producer, printing what a consumer would observe.

use std::convert::Infallible;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::cache::{CacheError, DataCache, LoadOutcome, Page, Paginator, Snapshot};
use crate::cli::{Cli, CliError, Command, FeedArgs, PaginateArgs, ResolveArgs};
use crate::config::{CacheConfig, ConfigError};
use crate::feed::{price_key, FeedConfig, FeedHandle, FeedMessage};

/// Errors that end a demo run
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Cli(#[from] CliError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Failed to encode stats: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// A marketplace listing served by the simulated indexer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub token_id: u64,
    pub name: String,
    pub price_eth: f64,
}

/// Builds a deterministic collection of `total` listings
pub fn simulated_listings(total: usize) -> Vec<Listing> {
    (0..total as u64)
        .map(|token_id| Listing {
            token_id,
            name: format!("Genesis #{}", token_id),
            price_eth: 0.05 + (token_id % 20) as f64 * 0.01,
        })
        .collect()
}

/// Failure raised by the simulated producers
#[derive(Debug, Error)]
#[error("simulated producer failure on call {0}")]
pub struct SimulatedFailure(pub u64);

/// Parses arguments, loads config and runs the selected demo
pub async fn run(cli: Cli) -> Result<(), AppError> {
    cli.validate()?;
    let config = CacheConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "starting demo");
    let cache = DataCache::new(config);

    let mut out = io::stdout().lock();
    match &cli.command {
        Command::Resolve(args) => run_resolve(&cache, args, &mut out).await,
        Command::Paginate(args) => run_paginate(&cache, args, &mut out).await,
        Command::Feed(args) => run_feed(&cache, args, &mut out).await,
    }
}

/// Resolves one key `requests` times against a slow, flaky producer
pub async fn run_resolve<W: Write>(
    cache: &DataCache,
    args: &ResolveArgs,
    out: &mut W,
) -> Result<(), AppError> {
    let mut options = cache.options().stale_while_revalidate(!args.no_swr);
    if let Some(ttl) = args.ttl() {
        options = options.ttl(ttl);
    }

    let calls = Arc::new(AtomicU64::new(0));
    let mut rng = match args.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let latency = Duration::from_millis(args.latency_ms);

    for request in 1..=args.requests {
        let fail = rng.f64() < args.failure_rate;
        let producer = {
            let calls = Arc::clone(&calls);
            let key = args.key.clone();
            move || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    tokio::time::sleep(latency).await;
                    if fail {
                        Err(SimulatedFailure(call))
                    } else {
                        Ok(format!("{}@v{}", key, call))
                    }
                }
            }
        };

        let resolved = cache.resolve(&args.key, producer, options).await?;
        write_snapshot(out, &format!("request {}", request), resolved.snapshot())?;

        let revalidating = resolved.is_revalidating();
        let settled = resolved.settle().await;
        if revalidating {
            write_snapshot(out, "  revalidated", &settled)?;
        }
        if let Some(err) = settled.error() {
            if settled.value().is_some() {
                tracing::warn!(key = %args.key, error = %err, "serving stale value after producer failure");
            } else {
                tracing::warn!(key = %args.key, error = %err, "no value available");
            }
        }

        if request < args.requests {
            tokio::time::sleep(Duration::from_millis(args.spacing_ms)).await;
        }
    }

    writeln!(out, "producer calls: {}", calls.load(Ordering::SeqCst))?;
    if args.stats {
        write_stats(out, cache)?;
    }
    Ok(())
}

/// Pages through a simulated listing collection until exhausted
pub async fn run_paginate<W: Write>(
    cache: &DataCache,
    args: &PaginateArgs,
    out: &mut W,
) -> Result<(), AppError> {
    let listings = Arc::new(simulated_listings(args.total));
    let page_size = args.page_size;
    let latency = Duration::from_millis(args.latency_ms);

    let fetch_page = {
        let listings = Arc::clone(&listings);
        move |n: usize| {
            let start = (n * page_size).min(listings.len());
            let end = (start + page_size).min(listings.len());
            let items = listings[start..end].to_vec();
            let has_more = end < listings.len();
            async move {
                tokio::time::sleep(latency).await;
                Ok::<_, Infallible>(Page::new(items, has_more))
            }
        }
    };
    let paginator = Paginator::new(cache.clone(), args.prefix.clone(), fetch_page);

    let outcome = paginator.load_initial().await?;
    write_outcome(out, &outcome, paginator.len())?;
    loop {
        match paginator.load_more().await? {
            LoadOutcome::Exhausted | LoadOutcome::NotLoaded => break,
            outcome => write_outcome(out, &outcome, paginator.len())?,
        }
    }

    let items = paginator.items();
    writeln!(
        out,
        "loaded {} items in {} pages (exhausted: {})",
        items.len(),
        paginator.page_count(),
        paginator.is_exhausted()
    )?;
    if let (Some(first), Some(last)) = (items.first(), items.last()) {
        writeln!(out, "first: {} ({:.2} ETH)", first.name, first.price_eth)?;
        writeln!(out, "last: {} ({:.2} ETH)", last.name, last.price_eth)?;
    }

    if args.stats {
        write_stats(out, cache)?;
    }
    Ok(())
}

/// Runs the price feed for a number of ticks, reading prices back from the cache
pub async fn run_feed<W: Write>(
    cache: &DataCache,
    args: &FeedArgs,
    out: &mut W,
) -> Result<(), AppError> {
    let mut config = FeedConfig {
        interval: Duration::from_millis(args.interval_ms),
        volatility: args.volatility,
        ..FeedConfig::default()
    };
    let symbols = args.parse_symbols()?;
    if !symbols.is_empty() {
        config.symbols = symbols;
    }
    let tracked: Vec<String> = config.symbols.iter().map(|(s, _)| s.clone()).collect();

    let rng = match args.seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    let mut handle = FeedHandle::spawn_with_rng(config, cache.clone(), rng);

    while let Some(message) = handle.recv().await {
        match message {
            FeedMessage::PriceUpdated(tick) => {
                tracing::trace!(symbol = %tick.symbol, price = tick.price, "price tick");
            }
            FeedMessage::TickCompleted { tick } => {
                let prices: Vec<String> = tracked
                    .iter()
                    .filter_map(|symbol| {
                        let cached = cache.get::<f64>(&price_key(symbol))?;
                        Some(format!("{}={:.4}", symbol, cached.data))
                    })
                    .collect();
                writeln!(out, "tick {}: {}", tick, prices.join(" "))?;
                if tick >= args.ticks {
                    break;
                }
            }
        }
    }
    handle.shutdown().await;

    if args.stats {
        write_stats(out, cache)?;
    }
    Ok(())
}

fn write_snapshot<W: Write, T: std::fmt::Display>(
    out: &mut W,
    label: &str,
    snapshot: &Snapshot<T>,
) -> io::Result<()> {
    let value = snapshot
        .value()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    let error = snapshot
        .error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "none".to_string());
    writeln!(
        out,
        "{}: value={} stale={} error={}",
        label,
        value,
        snapshot.is_stale(),
        error
    )
}

fn write_outcome<W: Write>(out: &mut W, outcome: &LoadOutcome, total: usize) -> io::Result<()> {
    match outcome {
        LoadOutcome::Loaded { page, added } => {
            writeln!(out, "page {}: +{} items ({} total)", page, added, total)
        }
        LoadOutcome::AlreadyLoading => writeln!(out, "page load already in flight"),
        LoadOutcome::Exhausted => writeln!(out, "no more pages"),
        LoadOutcome::Superseded => writeln!(out, "page discarded after reset"),
        LoadOutcome::NotLoaded => writeln!(out, "no first page loaded yet"),
    }
}

fn write_stats<W: Write>(out: &mut W, cache: &DataCache) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(&cache.stats())?;
    writeln!(out, "{}", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_args() -> ResolveArgs {
        ResolveArgs {
            key: "balance".to_string(),
            requests: 3,
            spacing_ms: 200,
            latency_ms: 50,
            ttl_ms: Some(100),
            failure_rate: 0.0,
            no_swr: false,
            seed: Some(1),
            stats: false,
        }
    }

    #[test]
    fn test_simulated_listings_are_sequential() {
        let listings = simulated_listings(3);
        assert_eq!(listings.len(), 3);
        assert_eq!(listings[2].token_id, 2);
        assert_eq!(listings[2].name, "Genesis #2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resolve_serves_stale_then_revalidates() {
        let cache = DataCache::default();
        let mut out = Vec::new();

        run_resolve(&cache, &resolve_args(), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("request 1: value=balance@v1 stale=false"));
        assert!(text.contains("request 2: value=balance@v1 stale=true"));
        assert!(text.contains("  revalidated: value=balance@v2 stale=false"));
        assert!(text.contains("producer calls: 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resolve_reports_failures() {
        let cache = DataCache::default();
        let args = ResolveArgs {
            failure_rate: 1.0,
            requests: 1,
            ..resolve_args()
        };
        let mut out = Vec::new();

        run_resolve(&cache, &args, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("request 1: value=- stale=false error=Producer failed"));
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_paginate_loads_every_item() {
        let cache = DataCache::default();
        let args = PaginateArgs {
            prefix: "listings".to_string(),
            total: 25,
            page_size: 10,
            latency_ms: 10,
            stats: true,
        };
        let mut out = Vec::new();

        run_paginate(&cache, &args, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("loaded 25 items in 3 pages (exhausted: true)"));
        assert!(text.contains("last: Genesis #24"));
        assert!(text.contains("\"listings_page_2\""));
        assert_eq!(cache.stats().size, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_feed_prints_each_tick() {
        let cache = DataCache::default();
        let args = FeedArgs {
            ticks: 3,
            interval_ms: 100,
            volatility: 0.01,
            symbols: vec!["ETH=3000".to_string()],
            seed: Some(9),
            stats: false,
        };
        let mut out = Vec::new();

        run_feed(&cache, &args, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("tick 1: ETH="));
        assert!(text.contains("tick 3: ETH="));
        assert!(!text.contains("tick 4"));
        assert!(cache.get::<f64>("price_eth").is_some());
    }
}
