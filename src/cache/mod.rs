//! Cache module for producer-backed data
//!
//! This module provides an in-memory store with per-entry TTL, a resolver
//! that layers stale-while-revalidate on top of it, and a paginated
//! accumulator that loads one cached page at a time. Expired entries remain
//! readable so callers can keep showing stale data when a producer fails.

mod error;
mod fetch;
mod paginated;
mod store;

pub use error::{CacheError, ProducerError};
pub use fetch::{DataCache, ResolveOptions, Resolved, Revalidation, Snapshot};
pub use paginated::{LoadOutcome, Page, PaginationState, Paginator};
pub use store::{CacheStats, CacheStore, CachedData, EntryStats, MAX_TTL};
