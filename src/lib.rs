//! swrcache library
//!
//! An in-memory TTL cache with stale-while-revalidate resolution and a
//! paginated accumulator, plus the simulated producers used by the demo
//! binary. Modules are public for use in integration tests.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod feed;

pub use cache::{
    CacheError, CacheStats, CacheStore, DataCache, LoadOutcome, Page, PaginationState, Paginator,
    ResolveOptions, Resolved, Snapshot,
};
pub use config::CacheConfig;
