//! Simulated price feed
//!
//! Drives token prices with a bounded random walk on a fixed interval. Each
//! tick primes the shared `DataCache` under `price_<symbol>` and reports the
//! new prices through a tokio channel, so consumers can either poll the
//! channel or resolve prices from the cache.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::cache::DataCache;

/// Lowest price the walk can reach
pub const PRICE_FLOOR: f64 = 0.0001;

/// A price observation for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    /// Relative change from the previous tick
    pub change: f64,
    pub observed_at: DateTime<Utc>,
}

/// Messages sent from the feed task to subscribers
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// A symbol's price moved
    PriceUpdated(PriceTick),
    /// All symbols were updated for one tick
    TickCompleted { tick: u64 },
}

/// Configuration for the simulated feed
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Maximum relative move per tick (0.02 = 2%)
    pub volatility: f64,
    /// Symbols and their starting prices
    pub symbols: Vec<(String, f64)>,
    /// Whether the feed task runs at all
    pub enabled: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            volatility: 0.02,
            symbols: vec![
                ("ETH".to_string(), 3200.0),
                ("BTC".to_string(), 64000.0),
                ("SOL".to_string(), 145.0),
            ],
            enabled: true,
        }
    }
}

/// Cache key under which a symbol's price is primed
pub fn price_key(symbol: &str) -> String {
    format!("price_{}", symbol.to_lowercase())
}

/// Moves `price` by a uniform random fraction in `[-volatility, volatility]`
///
/// The result never drops below [`PRICE_FLOOR`].
pub fn random_walk_step(price: f64, volatility: f64, rng: &mut fastrand::Rng) -> f64 {
    let volatility = volatility.abs();
    let delta = (rng.f64() * 2.0 - 1.0) * volatility;
    (price * (1.0 + delta)).max(PRICE_FLOOR)
}

/// Handle for controlling the feed task
pub struct FeedHandle {
    /// Channel for receiving feed messages
    pub receiver: mpsc::Receiver<FeedMessage>,
    shutdown_tx: mpsc::Sender<()>,
}

impl FeedHandle {
    /// Spawns the feed task
    ///
    /// Prices are primed into `cache` with a TTL of twice the tick interval,
    /// so a missed tick leaves a stale rather than a missing price.
    pub fn spawn(config: FeedConfig, cache: DataCache) -> Self {
        Self::spawn_with_rng(config, cache, fastrand::Rng::new())
    }

    /// Spawns the feed task with a seeded generator
    pub fn spawn_with_rng(config: FeedConfig, cache: DataCache, mut rng: fastrand::Rng) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            let ttl = config.interval.saturating_mul(2);
            let mut prices: HashMap<String, f64> = config.symbols.iter().cloned().collect();
            for (symbol, price) in &prices {
                let _ = cache.prime(&price_key(symbol), *price, ttl);
            }

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                // Skip the first tick (immediate)
                interval.tick().await;
                let mut tick: u64 = 0;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            tick += 1;
                            for (symbol, _) in &config.symbols {
                                let Some(price) = prices.get_mut(symbol) else {
                                    continue;
                                };
                                let previous = *price;
                                *price = random_walk_step(previous, config.volatility, &mut rng);
                                let _ = cache.prime(&price_key(symbol), *price, ttl);

                                let update = PriceTick {
                                    symbol: symbol.clone(),
                                    price: *price,
                                    change: (*price - previous) / previous,
                                    observed_at: Utc::now(),
                                };
                                if msg_tx.send(FeedMessage::PriceUpdated(update)).await.is_err() {
                                    tracing::debug!("feed receiver dropped, stopping");
                                    return;
                                }
                            }
                            let _ = msg_tx.send(FeedMessage::TickCompleted { tick }).await;
                        }
                        _ = shutdown_rx.recv() => {
                            tracing::debug!(tick, "feed shut down");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Waits for the next feed message
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }

    /// Shuts down the feed task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Checks for a pending feed message without blocking
pub fn try_recv(handle: &mut FeedHandle) -> Option<FeedMessage> {
    handle.receiver.try_recv().ok()
}
