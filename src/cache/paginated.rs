//! Paginated accumulation on top of `DataCache`
//!
//! A `Paginator` fetches pages one at a time through the cache, keyed
//! `<prefix>_page_<n>`, and keeps the loaded pages in order. Reloading a page
//! inside its TTL window is served from the cache.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::CacheError;
use super::fetch::{DataCache, ResolveOptions};

/// One page returned by a page fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Whether another page follows this one
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_more: bool) -> Self {
        Self { items, has_more }
    }
}

/// Lifecycle of a paginator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    /// Nothing loaded yet
    Idle,
    /// First page in flight
    Loading,
    /// Pages loaded; exhausted once `has_more` is false
    Ready,
    /// A following page is in flight
    LoadingMore,
}

/// Result of a load call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was loaded and `added` items appended
    Loaded { page: usize, added: usize },
    /// Another `load_more` was in flight; this call was dropped
    AlreadyLoading,
    /// No more pages to load
    Exhausted,
    /// `load_more` was called before any page was loaded
    NotLoaded,
    /// A `load_initial` reset the pages while this page was loading
    Superseded,
}

#[derive(Debug)]
struct PageState<T> {
    pages: Vec<Arc<Page<T>>>,
    has_more: bool,
    /// Number of `load_initial` calls in flight
    loading_initial: usize,
    loading_more: bool,
    /// Bumped whenever the pages are replaced
    generation: u64,
}

impl<T> PageState<T> {
    fn lifecycle(&self) -> PaginationState {
        if self.loading_initial > 0 {
            PaginationState::Loading
        } else if self.loading_more {
            PaginationState::LoadingMore
        } else if self.pages.is_empty() {
            PaginationState::Idle
        } else {
            PaginationState::Ready
        }
    }
}

/// Accumulates pages produced by `fetch_page`
///
/// All methods take `&self`, so a paginator can be shared between tasks
/// behind an `Arc`. Only one `load_more` runs at a time; extra calls made
/// while one is in flight return `LoadOutcome::AlreadyLoading`.
pub struct Paginator<T, F> {
    cache: DataCache,
    prefix: String,
    fetch_page: F,
    options: ResolveOptions,
    state: Mutex<PageState<T>>,
}

impl<T, F> std::fmt::Debug for Paginator<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Paginator")
            .field("prefix", &self.prefix)
            .field("pages", &state.pages.len())
            .field("has_more", &state.has_more)
            .field("state", &state.lifecycle())
            .finish()
    }
}

impl<T, F, Fut, E> Paginator<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    /// Creates an idle paginator
    ///
    /// # Arguments
    /// * `cache` - Cache the pages are resolved through, with its default options
    /// * `prefix` - Key prefix; page `n` is cached as `<prefix>_page_<n>`
    /// * `fetch_page` - Producer called with a page index on a cache miss
    pub fn new(cache: DataCache, prefix: impl Into<String>, fetch_page: F) -> Self {
        let options = cache.options();
        Self {
            cache,
            prefix: prefix.into(),
            fetch_page,
            options,
            state: Mutex::new(PageState {
                pages: Vec::new(),
                has_more: true,
                loading_initial: 0,
                loading_more: false,
                generation: 0,
            }),
        }
    }

    /// Overrides the resolve options used for every page
    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    /// Cache key for page `n`
    pub fn page_key(&self, n: usize) -> String {
        format!("{}_page_{}", self.prefix, n)
    }

    /// Loads page 0, replacing everything loaded so far
    ///
    /// # Returns
    /// * `Ok(LoadOutcome::Loaded)` with the size of the first page
    /// * `Err(CacheError)` if the page could not be produced; previously
    ///   loaded pages are kept
    pub async fn load_initial(&self) -> Result<LoadOutcome, CacheError> {
        self.state.lock().loading_initial += 1;

        let result = self.load_page(0).await;

        let mut state = self.state.lock();
        state.loading_initial -= 1;
        let page = result?;

        let added = page.items.len();
        state.generation += 1;
        state.has_more = page.has_more;
        state.pages = vec![page];
        tracing::debug!(prefix = %self.prefix, added, has_more = state.has_more, "loaded first page");
        Ok(LoadOutcome::Loaded { page: 0, added })
    }

    /// Loads and appends the next page
    ///
    /// # Returns
    /// * `Ok(LoadOutcome::Loaded)` when a page was appended
    /// * `Ok(LoadOutcome::AlreadyLoading)` if another `load_more` is running
    /// * `Ok(LoadOutcome::Exhausted)` once the last page reported no more data
    /// * `Ok(LoadOutcome::NotLoaded)` before the first page has loaded
    /// * `Ok(LoadOutcome::Superseded)` if `load_initial` replaced the pages
    ///   while this page was loading
    /// * `Err(CacheError)` if the page could not be produced
    pub async fn load_more(&self) -> Result<LoadOutcome, CacheError> {
        let (next, generation) = {
            let mut state = self.state.lock();
            if state.pages.is_empty() {
                return Ok(LoadOutcome::NotLoaded);
            }
            if state.loading_more {
                return Ok(LoadOutcome::AlreadyLoading);
            }
            if !state.has_more {
                return Ok(LoadOutcome::Exhausted);
            }
            state.loading_more = true;
            (state.pages.len(), state.generation)
        };

        let result = self.load_page(next).await;

        let mut state = self.state.lock();
        state.loading_more = false;
        let page = result?;
        if state.generation != generation {
            tracing::debug!(prefix = %self.prefix, page = next, "discarding page loaded before reset");
            return Ok(LoadOutcome::Superseded);
        }

        let added = page.items.len();
        state.has_more = page.has_more;
        state.pages.push(page);
        tracing::debug!(prefix = %self.prefix, page = next, added, has_more = state.has_more, "appended page");
        Ok(LoadOutcome::Loaded { page: next, added })
    }

    /// Invalidates every cached page under this prefix and reloads page 0
    pub async fn refresh(&self) -> Result<LoadOutcome, CacheError> {
        self.cache.invalidate_prefix(&format!("{}_page_", self.prefix));
        self.load_initial().await
    }

    async fn load_page(&self, n: usize) -> Result<Arc<Page<T>>, CacheError> {
        let key = self.page_key(n);
        let fetch_page = &self.fetch_page;
        let resolved = self.cache.resolve(&key, || fetch_page(n), self.options).await?;
        // A background refresh, if started, updates the cache on its own
        let (snapshot, _revalidation) = resolved.into_parts();
        snapshot.into_result()
    }
}

impl<T, F> Paginator<T, F> {
    pub fn state(&self) -> PaginationState {
        self.state.lock().lifecycle()
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().has_more
    }

    /// Ready with no further pages
    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock();
        state.lifecycle() == PaginationState::Ready && !state.has_more
    }

    /// Index of the last loaded page
    pub fn current_page(&self) -> Option<usize> {
        self.state.lock().pages.len().checked_sub(1)
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Total number of accumulated items
    pub fn len(&self) -> usize {
        self.state.lock().pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl<T: Clone, F> Paginator<T, F> {
    /// All loaded items, in page order
    pub fn items(&self) -> Vec<T> {
        self.state
            .lock()
            .pages
            .iter()
            .flat_map(|page| page.items.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const PAGE_SIZE: usize = 4;

    /// Page fetcher over `total_pages` pages of `PAGE_SIZE` sequential numbers
    fn numbered_pages(
        calls: Arc<AtomicUsize>,
        total_pages: usize,
    ) -> impl Fn(usize) -> futures::future::BoxFuture<'static, Result<Page<usize>, CacheError>> {
        use futures::FutureExt;
        move |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let items = (n * PAGE_SIZE..(n + 1) * PAGE_SIZE).collect();
                Ok(Page::new(items, n + 1 < total_pages))
            }
            .boxed()
        }
    }

    fn paginator(
        calls: &Arc<AtomicUsize>,
        total_pages: usize,
    ) -> Paginator<usize, impl Fn(usize) -> futures::future::BoxFuture<'static, Result<Page<usize>, CacheError>>>
    {
        Paginator::new(
            DataCache::default(),
            "listings",
            numbered_pages(Arc::clone(calls), total_pages),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_paginator_is_idle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 3);

        assert_eq!(pager.state(), PaginationState::Idle);
        assert!(pager.has_more());
        assert!(pager.is_empty());
        assert_eq!(pager.current_page(), None);
        assert_eq!(pager.page_key(2), "listings_page_2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_initial_loads_first_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 3);

        let outcome = pager.load_initial().await.unwrap();

        assert_eq!(outcome, LoadOutcome::Loaded { page: 0, added: PAGE_SIZE });
        assert_eq!(pager.state(), PaginationState::Ready);
        assert_eq!(pager.items(), vec![0, 1, 2, 3]);
        assert_eq!(pager.current_page(), Some(0));
        assert!(pager.has_more());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_accumulate_until_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 3);

        pager.load_initial().await.unwrap();
        for _ in 0..3 {
            pager.load_more().await.unwrap();
        }

        assert_eq!(pager.len(), 3 * PAGE_SIZE);
        assert_eq!(pager.items(), (0..3 * PAGE_SIZE).collect::<Vec<_>>());
        assert!(!pager.has_more());
        assert!(pager.is_exhausted());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let outcome = pager.load_more().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Exhausted);
        assert_eq!(pager.len(), 3 * PAGE_SIZE);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "exhausted paginator must not fetch");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_load_more_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 5);
        pager.load_initial().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (first, second) = tokio::join!(pager.load_more(), pager.load_more());

        assert_eq!(first.unwrap(), LoadOutcome::Loaded { page: 1, added: PAGE_SIZE });
        assert_eq!(second.unwrap(), LoadOutcome::AlreadyLoading);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pager.page_count(), 2);
        assert_eq!(pager.state(), PaginationState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_initial_resets_and_reuses_cached_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 5);
        pager.load_initial().await.unwrap();
        pager.load_more().await.unwrap();
        assert_eq!(pager.page_count(), 2);

        pager.load_initial().await.unwrap();

        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.items(), vec![0, 1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "page 0 is still fresh in the cache");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_refetches_page_zero() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 5);
        pager.load_initial().await.unwrap();
        pager.load_more().await.unwrap();

        pager.refresh().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(pager.page_count(), 1);
        assert!(pager.cache.get::<Page<usize>>("listings_page_1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_load_keeps_previous_pages() {
        let fail = Arc::new(AtomicBool::new(false));
        let fail_flag = Arc::clone(&fail);
        let pager = Paginator::new(DataCache::default(), "activity", move |n: usize| {
            let fail = fail_flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(CacheError::producer("indexer offline"))
                } else {
                    Ok(Page::new(vec![n], true))
                }
            }
        });
        pager.load_initial().await.unwrap();
        pager.load_more().await.unwrap();

        fail.store(true, Ordering::SeqCst);
        let err = pager.refresh().await.unwrap_err();

        assert!(err.is_producer_failure());
        assert_eq!(pager.items(), vec![0, 1]);
        assert_eq!(pager.state(), PaginationState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_more_can_be_retried() {
        let fail = Arc::new(AtomicBool::new(false));
        let fail_flag = Arc::clone(&fail);
        let pager = Paginator::new(DataCache::default(), "holders", move |n: usize| {
            let fail = fail_flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(CacheError::producer("rate limited"))
                } else {
                    Ok(Page::new(vec![n * 10], true))
                }
            }
        });
        pager.load_initial().await.unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(pager.load_more().await.is_err());
        assert_eq!(pager.state(), PaginationState::Ready);
        assert_eq!(pager.page_count(), 1);

        fail.store(false, Ordering::SeqCst);
        let outcome = pager.load_more().await.unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded { page: 1, added: 1 });
        assert_eq!(pager.items(), vec![0, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_load_more_discards_old_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = DataCache::default();
        let pager = Paginator::new(cache.clone(), "feed", {
            let calls = Arc::clone(&calls);
            move |n: usize| {
                calls.fetch_add(1, Ordering::SeqCst);
                // Later pages are slower than the first
                let delay = if n == 0 { 5 } else { 50 };
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, CacheError>(Page::new(vec![n], true))
                }
            }
        });
        pager.load_initial().await.unwrap();
        cache.invalidate("feed_page_0");

        let (more, initial) = tokio::join!(pager.load_more(), pager.load_initial());

        assert_eq!(more.unwrap(), LoadOutcome::Superseded);
        assert_eq!(initial.unwrap(), LoadOutcome::Loaded { page: 0, added: 1 });
        assert_eq!(pager.items(), vec![0]);
        assert_eq!(pager.state(), PaginationState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_settles_after_failed_reset_overlapping_load_more() {
        let fail_first = Arc::new(AtomicBool::new(false));
        let cache = DataCache::default();
        let pager = Paginator::new(cache.clone(), "offers", {
            let fail_first = Arc::clone(&fail_first);
            move |n: usize| {
                let fail = n == 0 && fail_first.load(Ordering::SeqCst);
                let delay = if n == 0 { 50 } else { 5 };
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    if fail {
                        Err(CacheError::producer("indexer offline"))
                    } else {
                        Ok(Page::new(vec![n], true))
                    }
                }
            }
        });
        pager.load_initial().await.unwrap();
        cache.invalidate("offers_page_0");
        fail_first.store(true, Ordering::SeqCst);

        let (more, initial) = tokio::join!(pager.load_more(), pager.load_initial());

        assert_eq!(more.unwrap(), LoadOutcome::Loaded { page: 1, added: 1 });
        assert!(initial.is_err());
        assert_eq!(pager.state(), PaginationState::Ready);
        assert_eq!(pager.items(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reports_loading_while_first_page_in_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 3);

        let observe = async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            pager.state()
        };
        let (loaded, during) = tokio::join!(pager.load_initial(), observe);

        assert!(loaded.is_ok());
        assert_eq!(during, PaginationState::Loading);
        assert_eq!(pager.state(), PaginationState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_more_before_first_page_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = paginator(&calls, 3);

        let outcome = pager.load_more().await.unwrap();

        assert_eq!(outcome, LoadOutcome::NotLoaded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pager.state(), PaginationState::Idle);
        assert!(pager.is_empty());
    }
}
