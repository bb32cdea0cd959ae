//! Metadata resolver with TTL caching and request coalescing
//!
//! `MetadataResolver` sits between the host application and a
//! [`MetadataFetcher`]. It serves live entries from memory, shares one
//! in-flight lookup between every concurrent caller for the same app, and
//! remembers failures for a short cooldown so a broken app is not hammered.
//!
//! Lookups run as spawned tasks. A caller that stops awaiting does not cancel
//! the lookup; its result still lands in the cache for everyone else.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::clock::{Clock, SystemClock};
use crate::data::{
    AppCard, AppIdentifier, AppMetadata, AppsConfiguration, IdentifierError, MetadataFetcher,
    ResolveError,
};

/// Result handed to every caller waiting on a lookup
pub type ResolveResult = Result<Arc<AppMetadata>, ResolveError>;

type SharedLookup = Shared<BoxFuture<'static, ResolveResult>>;

/// Errors raised when building a resolver
#[derive(Debug, Error)]
pub enum ResolverConfigError {
    #[error("ttl must be positive, got {0}")]
    NonPositiveTtl(Duration),

    #[error("failure cooldown must not be negative, got {0}")]
    NegativeCooldown(Duration),
}

/// Caching policy for a [`MetadataResolver`]
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a fetched entry stays live
    pub ttl: Duration,
    /// How long a failed lookup is answered from the negative cache.
    /// Zero disables negative caching.
    pub failure_cooldown: Duration,
    /// On a network failure, return the last known metadata if any
    pub serve_stale_on_error: bool,
    /// Directory for the on-disk tier; `None` keeps the cache in memory only
    pub cache_dir: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            failure_cooldown: Duration::seconds(30),
            serve_stale_on_error: false,
            cache_dir: None,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ResolverConfigError> {
        if self.ttl <= Duration::zero() {
            return Err(ResolverConfigError::NonPositiveTtl(self.ttl));
        }
        if self.failure_cooldown < Duration::zero() {
            return Err(ResolverConfigError::NegativeCooldown(self.failure_cooldown));
        }
        Ok(())
    }
}

/// Counters describing how requests were served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Served from a live memory entry
    pub hits: u64,
    /// Started a new lookup
    pub misses: u64,
    /// Joined a lookup that was already in flight
    pub coalesced: u64,
    /// Lookups answered by a fresh disk entry
    pub disk_hits: u64,
    /// Calls made to the fetcher
    pub fetches: u64,
    /// Served from the negative cache or as stale metadata during a cooldown
    pub cooldown_hits: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    disk_hits: AtomicU64,
    fetches: AtomicU64,
    cooldown_hits: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            cooldown_hits: self.cooldown_hits.load(Ordering::Relaxed),
        }
    }
}

/// A fetched snapshot, replaced whole on refresh
struct CacheEntry {
    metadata: Arc<AppMetadata>,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.fetched_at + self.ttl
    }
}

struct FailureEntry {
    error: ResolveError,
    failed_at: DateTime<Utc>,
}

struct InFlight {
    request: u64,
    lookup: SharedLookup,
}

#[derive(Default)]
struct State {
    entries: HashMap<AppIdentifier, CacheEntry>,
    failures: HashMap<AppIdentifier, FailureEntry>,
    in_flight: HashMap<AppIdentifier, InFlight>,
    next_request: u64,
}

impl State {
    /// Drops the in-flight slot only if it still belongs to `request`
    fn finish_request(&mut self, identifier: &AppIdentifier, request: u64) {
        if self.in_flight.get(identifier).map(|f| f.request) == Some(request) {
            self.in_flight.remove(identifier);
        }
    }
}

struct Inner {
    fetcher: Arc<dyn MetadataFetcher>,
    clock: Arc<dyn Clock>,
    disk: Option<CacheManager>,
    config: ResolverConfig,
    state: Mutex<State>,
    counters: Counters,
}

fn disk_key(identifier: &AppIdentifier) -> String {
    format!("app_{}", identifier)
}

impl Inner {
    /// Body of a spawned lookup. Runs to completion regardless of waiters.
    async fn run_lookup(self: Arc<Self>, identifier: AppIdentifier, request: u64) -> ResolveResult {
        let mut stale_from_disk = None;

        if let Some(disk) = &self.disk {
            let now = self.clock.now();
            if let Some(cached) = disk.read::<AppMetadata>(&disk_key(&identifier), now) {
                // A file written under a longer ttl must not outlive this resolver's ttl
                let ttl = (cached.expires_at - cached.cached_at).min(self.config.ttl);
                if now < cached.cached_at + ttl {
                    debug!(id = %identifier, "Disk cache hit");
                    Counters::bump(&self.counters.disk_hits);
                    let metadata = Arc::new(cached.data);
                    let mut state = self.state.lock();
                    state.finish_request(&identifier, request);
                    state.failures.remove(&identifier);
                    state.entries.insert(
                        identifier,
                        CacheEntry {
                            metadata: Arc::clone(&metadata),
                            fetched_at: cached.cached_at,
                            ttl,
                        },
                    );
                    return Ok(metadata);
                }
                stale_from_disk = Some(cached);
            }
        }

        Counters::bump(&self.counters.fetches);
        let outcome = self.fetcher.fetch(&identifier).await;
        let now = self.clock.now();

        match outcome {
            Ok(metadata) => {
                info!(id = %identifier, name = %metadata.name, "Resolved app metadata");
                let metadata = Arc::new(metadata);
                {
                    let mut state = self.state.lock();
                    state.finish_request(&identifier, request);
                    state.failures.remove(&identifier);
                    state.entries.insert(
                        identifier.clone(),
                        CacheEntry {
                            metadata: Arc::clone(&metadata),
                            fetched_at: now,
                            ttl: self.config.ttl,
                        },
                    );
                }
                if let Some(disk) = &self.disk {
                    if let Err(e) = disk.write(&disk_key(&identifier), &*metadata, now, self.config.ttl) {
                        warn!(id = %identifier, error = %e, "Failed to write disk cache");
                    }
                }
                Ok(metadata)
            }
            Err(error) => {
                warn!(id = %identifier, error = %error, "App lookup failed");
                let mut state = self.state.lock();
                state.finish_request(&identifier, request);
                if self.config.failure_cooldown > Duration::zero() {
                    state.failures.insert(
                        identifier.clone(),
                        FailureEntry {
                            error: error.clone(),
                            failed_at: now,
                        },
                    );
                }

                if !(self.config.serve_stale_on_error && error.is_transient()) {
                    return Err(error);
                }

                if let Some(entry) = state.entries.get(&identifier) {
                    debug!(id = %identifier, "Serving stale memory entry after network failure");
                    return Ok(Arc::clone(&entry.metadata));
                }

                match stale_from_disk {
                    Some(cached) => {
                        debug!(id = %identifier, "Serving stale disk entry after network failure");
                        let metadata = Arc::new(cached.data);
                        state.entries.insert(
                            identifier,
                            CacheEntry {
                                metadata: Arc::clone(&metadata),
                                fetched_at: cached.cached_at,
                                ttl: (cached.expires_at - cached.cached_at).min(self.config.ttl),
                            },
                        );
                        Ok(metadata)
                    }
                    None => Err(error),
                }
            }
        }
    }
}

/// Why a configured app did not produce a card
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A configured app that failed to resolve
#[derive(Debug, Clone)]
pub struct EntryFailure {
    /// URL as written in the configuration
    pub url: String,
    pub error: EntryError,
}

/// Resolved "other apps" section ready for rendering
#[derive(Debug, Clone)]
pub struct ResolvedSection {
    pub title: String,
    pub subtitle: Option<String>,
    /// Resolved apps in configuration order
    pub cards: Vec<AppCard>,
    /// Apps that could not be resolved, in configuration order
    pub failures: Vec<EntryFailure>,
}

/// Shared, explicitly owned metadata cache
///
/// Cloning is cheap and every clone shares the same cache.
#[derive(Clone)]
pub struct MetadataResolver {
    inner: Arc<Inner>,
}

impl MetadataResolver {
    /// Creates a resolver using the system clock
    pub fn new(
        fetcher: Arc<dyn MetadataFetcher>,
        config: ResolverConfig,
    ) -> Result<Self, ResolverConfigError> {
        Self::with_clock(fetcher, Arc::new(SystemClock), config)
    }

    /// Creates a resolver with an injected clock
    pub fn with_clock(
        fetcher: Arc<dyn MetadataFetcher>,
        clock: Arc<dyn Clock>,
        config: ResolverConfig,
    ) -> Result<Self, ResolverConfigError> {
        config.validate()?;
        let disk = config.cache_dir.clone().map(CacheManager::with_dir);

        Ok(Self {
            inner: Arc::new(Inner {
                fetcher,
                clock,
                disk,
                config,
                state: Mutex::new(State::default()),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    /// Resolves one app, fetching only when no live entry exists
    ///
    /// Concurrent calls for the same identifier share a single lookup.
    pub async fn resolve(&self, identifier: &AppIdentifier) -> ResolveResult {
        let lookup = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now();

            if let Some(entry) = state.entries.get(identifier) {
                if entry.is_live(now) {
                    debug!(id = %identifier, "Cache hit");
                    Counters::bump(&self.inner.counters.hits);
                    return Ok(Arc::clone(&entry.metadata));
                }
            }

            if let Some(failure) = state.failures.get(identifier) {
                if now < failure.failed_at + self.inner.config.failure_cooldown {
                    debug!(id = %identifier, "Failure cooldown active");
                    Counters::bump(&self.inner.counters.cooldown_hits);
                    if self.inner.config.serve_stale_on_error && failure.error.is_transient() {
                        if let Some(entry) = state.entries.get(identifier) {
                            return Ok(Arc::clone(&entry.metadata));
                        }
                    }
                    return Err(failure.error.clone());
                }
            }

            let pending = state.in_flight.get(identifier).map(|f| f.lookup.clone());
            match pending {
                Some(lookup) => {
                    debug!(id = %identifier, "Joining in-flight lookup");
                    Counters::bump(&self.inner.counters.coalesced);
                    lookup
                }
                None => {
                    debug!(id = %identifier, "Cache miss");
                    Counters::bump(&self.inner.counters.misses);
                    self.start_lookup(&mut state, identifier)
                }
            }
        };

        lookup.await
    }

    /// Spawns a lookup and registers it as in flight. Caller holds the lock.
    fn start_lookup(&self, state: &mut State, identifier: &AppIdentifier) -> SharedLookup {
        let request = state.next_request;
        state.next_request += 1;

        let task = tokio::spawn(Arc::clone(&self.inner).run_lookup(identifier.clone(), request));

        let inner = Arc::clone(&self.inner);
        let id = identifier.clone();
        let lookup = task
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    inner.state.lock().finish_request(&id, request);
                    Err(ResolveError::Network(format!("lookup task failed: {}", e)))
                })
            })
            .boxed()
            .shared();

        state.in_flight.insert(
            identifier.clone(),
            InFlight {
                request,
                lookup: lookup.clone(),
            },
        );
        lookup
    }

    /// Resolves many apps concurrently, keeping input order
    ///
    /// A failure for one identifier never affects the others.
    pub async fn resolve_all(
        &self,
        identifiers: &[AppIdentifier],
    ) -> Vec<(AppIdentifier, ResolveResult)> {
        let results = join_all(identifiers.iter().map(|id| self.resolve(id))).await;
        identifiers.iter().cloned().zip(results).collect()
    }

    /// Resolves every app in a configuration into display cards
    pub async fn resolve_configuration(&self, config: &AppsConfiguration) -> ResolvedSection {
        let lookups = config.apps.iter().map(|app| async move {
            let identifier = AppIdentifier::parse(&app.app_store_url)?;
            let metadata = self.resolve(&identifier).await?;
            Ok::<_, EntryError>(AppCard::new(metadata, app))
        });
        let results = join_all(lookups).await;

        let mut cards = Vec::new();
        let mut failures = Vec::new();
        for (app, result) in config.apps.iter().zip(results) {
            match result {
                Ok(card) => cards.push(card),
                Err(error) => {
                    warn!(url = %app.app_store_url, error = %error, "Skipping app");
                    failures.push(EntryFailure {
                        url: app.app_store_url.clone(),
                        error,
                    });
                }
            }
        }

        ResolvedSection {
            title: config.title.clone(),
            subtitle: config.subtitle.clone(),
            cards,
            failures,
        }
    }

    /// Returns a live memory entry without fetching
    pub fn cached(&self, identifier: &AppIdentifier) -> Option<Arc<AppMetadata>> {
        let state = self.inner.state.lock();
        let now = self.inner.clock.now();
        state
            .entries
            .get(identifier)
            .filter(|entry| entry.is_live(now))
            .map(|entry| Arc::clone(&entry.metadata))
    }

    /// Forgets everything known about one app, including its disk entry
    ///
    /// A lookup already in flight still completes and repopulates the cache.
    pub fn invalidate(&self, identifier: &AppIdentifier) {
        {
            let mut state = self.inner.state.lock();
            state.entries.remove(identifier);
            state.failures.remove(identifier);
        }
        if let Some(disk) = &self.inner.disk {
            if let Err(e) = disk.remove(&disk_key(identifier)) {
                warn!(id = %identifier, error = %e, "Failed to remove disk cache entry");
            }
        }
    }

    /// Drops all memory and negative entries. The disk tier is left alone.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.failures.clear();
    }

    pub fn stats(&self) -> ResolverStats {
        self.inner.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::AppConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Fetcher that answers from a fixed table and counts calls
    struct FakeFetcher {
        calls: AtomicUsize,
        responses: Mutex<HashMap<String, Result<AppMetadata, ResolveError>>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                responses: Mutex::new(HashMap::new()),
                gate: None,
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn with_app(self, id: &str, name: &str, rating: f64) -> Self {
            self.set(id, Ok(metadata(id, name, rating)));
            self
        }

        fn set(&self, id: &str, response: Result<AppMetadata, ResolveError>) {
            self.responses.lock().insert(id.to_string(), response);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataFetcher for FakeFetcher {
        async fn fetch(&self, identifier: &AppIdentifier) -> Result<AppMetadata, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.responses
                .lock()
                .get(identifier.as_str())
                .cloned()
                .unwrap_or_else(|| Err(ResolveError::NotFound(identifier.clone())))
        }
    }

    fn metadata(id: &str, name: &str, rating: f64) -> AppMetadata {
        let mut metadata = AppMetadata::new(
            AppIdentifier::parse(id).unwrap(),
            name,
            format!("https://example.com/{}.png", id),
            format!("https://apps.apple.com/app/id{}", id),
        );
        metadata.rating = rating;
        metadata
    }

    fn id(s: &str) -> AppIdentifier {
        AppIdentifier::parse(s).unwrap()
    }

    fn resolver(fetcher: Arc<FakeFetcher>, clock: Arc<ManualClock>) -> MetadataResolver {
        MetadataResolver::with_clock(fetcher, clock, ResolverConfig::default()).unwrap()
    }

    /// Yields until `done` holds, so spawned tasks get to run
    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_resolve_caches_identical_object() {
        let fetcher = Arc::new(FakeFetcher::new().with_app("123", "Foo", 4.5));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let first = resolver.resolve(&id("id=123")).await.unwrap();
        assert_eq!(first.identifier.as_str(), "123");
        assert_eq!(first.name, "Foo");
        assert!((first.rating - 4.5).abs() < 0.001);

        let second = resolver.resolve(&id("123")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second), "Cache hit should return the same object");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(resolver.stats().hits, 1);
        assert_eq!(resolver.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_refetch() {
        let fetcher = Arc::new(FakeFetcher::new().with_app("1", "Old", 3.0));
        let clock = Arc::new(ManualClock::default());
        let resolver = resolver(Arc::clone(&fetcher), Arc::clone(&clock));

        let first = resolver.resolve(&id("1")).await.unwrap();
        clock.advance(Duration::hours(23));
        resolver.resolve(&id("1")).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        fetcher.set("1", Ok(metadata("1", "New", 4.0)));
        clock.advance(Duration::hours(1));
        assert!(resolver.cached(&id("1")).is_none(), "Entry at its ttl must not be live");

        let refreshed = resolver.resolve(&id("1")).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(refreshed.name, "New");
        assert!(!Arc::ptr_eq(&first, &refreshed));
    }

    #[tokio::test]
    async fn test_concurrent_resolves_issue_one_fetch() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)).with_app("7", "Seven", 5.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve(&id("7")).await })
            })
            .collect();

        let stats_resolver = resolver.clone();
        wait_until(move || {
            let stats = stats_resolver.stats();
            stats.misses + stats.coalesced == 10
        })
        .await;
        gate.notify_one();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(resolver.stats().misses, 1);
        assert_eq!(resolver.stats().coalesced, 9);
        assert!(results.iter().all(|m| Arc::ptr_eq(m, &results[0])));
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_lookup() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)).with_app("9", "Nine", 2.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let waiter = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&id("9")).await })
        };
        let check = Arc::clone(&fetcher);
        wait_until(move || check.calls() == 1).await;

        waiter.abort();
        gate.notify_one();

        let check = resolver.clone();
        wait_until(move || check.cached(&id("9")).is_some()).await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_does_not_affect_other_identifiers() {
        let fetcher = Arc::new(FakeFetcher::new().with_app("2", "Two", 4.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let results = resolver.resolve_all(&[id("1"), id("2")]).await;

        assert_eq!(results[0].0, id("1"));
        assert_eq!(results[0].1.as_ref().unwrap_err(), &ResolveError::NotFound(id("1")));
        assert_eq!(results[1].1.as_ref().unwrap().name, "Two");
    }

    #[tokio::test]
    async fn test_failure_cooldown_then_retry() {
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.set("5", Err(ResolveError::Network("offline".into())));
        let clock = Arc::new(ManualClock::default());
        let resolver = resolver(Arc::clone(&fetcher), Arc::clone(&clock));

        assert!(resolver.resolve(&id("5")).await.is_err());
        let again = resolver.resolve(&id("5")).await.unwrap_err();
        assert_eq!(again, ResolveError::Network("offline".into()));
        assert_eq!(fetcher.calls(), 1, "No refetch within the cooldown");
        assert_eq!(resolver.stats().cooldown_hits, 1);

        fetcher.set("5", Ok(metadata("5", "Five", 1.0)));
        clock.advance(Duration::seconds(30));
        assert_eq!(resolver.resolve(&id("5")).await.unwrap().name, "Five");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_cooldown_disables_negative_cache() {
        let fetcher = Arc::new(FakeFetcher::new());
        let config = ResolverConfig {
            failure_cooldown: Duration::zero(),
            ..Default::default()
        };
        let resolver = MetadataResolver::with_clock(
            Arc::clone(&fetcher) as Arc<dyn MetadataFetcher>,
            Arc::new(ManualClock::default()),
            config,
        )
        .unwrap();

        assert!(resolver.resolve(&id("3")).await.is_err());
        assert!(resolver.resolve(&id("3")).await.is_err());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_served_only_after_network_failure() {
        let fetcher = Arc::new(FakeFetcher::new().with_app("4", "Four", 4.0));
        let clock = Arc::new(ManualClock::default());
        let config = ResolverConfig {
            serve_stale_on_error: true,
            ..Default::default()
        };
        let resolver = MetadataResolver::with_clock(
            Arc::clone(&fetcher) as Arc<dyn MetadataFetcher>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        )
        .unwrap();

        let fresh = resolver.resolve(&id("4")).await.unwrap();
        clock.advance(Duration::hours(25));
        fetcher.set("4", Err(ResolveError::Network("timeout".into())));

        let stale = resolver.resolve(&id("4")).await.unwrap();
        assert_eq!(fetcher.calls(), 2, "A refresh must be attempted first");
        assert!(Arc::ptr_eq(&fresh, &stale));

        // Non-transient failures are never masked
        clock.advance(Duration::minutes(1));
        fetcher.set("4", Err(ResolveError::NotFound(id("4"))));
        assert!(resolver.resolve(&id("4")).await.is_err());
    }

    #[tokio::test]
    async fn test_disk_tier_survives_new_resolver() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());
        let config = ResolverConfig {
            cache_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };

        let fetcher = Arc::new(FakeFetcher::new().with_app("8", "Eight", 3.5));
        let first = MetadataResolver::with_clock(
            Arc::clone(&fetcher) as Arc<dyn MetadataFetcher>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config.clone(),
        )
        .unwrap();
        first.resolve(&id("8")).await.unwrap();
        assert!(temp_dir.path().join("app_8.json").exists());

        let cold_fetcher = Arc::new(FakeFetcher::new());
        let second = MetadataResolver::with_clock(
            Arc::clone(&cold_fetcher) as Arc<dyn MetadataFetcher>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        )
        .unwrap();
        clock.advance(Duration::hours(1));

        let metadata = second.resolve(&id("8")).await.unwrap();
        assert_eq!(metadata.name, "Eight");
        assert_eq!(cold_fetcher.calls(), 0);
        assert_eq!(second.stats().disk_hits, 1);

        second.invalidate(&id("8"));
        assert!(!temp_dir.path().join("app_8.json").exists());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_force_refetch() {
        let fetcher = Arc::new(FakeFetcher::new().with_app("6", "Six", 4.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        resolver.resolve(&id("6")).await.unwrap();
        resolver.invalidate(&id("6"));
        resolver.resolve(&id("6")).await.unwrap();
        resolver.clear();
        assert!(resolver.cached(&id("6")).is_none());
        resolver.resolve(&id("6")).await.unwrap();

        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_during_lookup_keeps_its_result() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)).with_app("11", "Eleven", 4.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let waiter = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&id("11")).await })
        };
        let check = Arc::clone(&fetcher);
        wait_until(move || check.calls() == 1).await;

        resolver.invalidate(&id("11"));
        resolver.clear();
        gate.notify_one();

        assert_eq!(waiter.await.unwrap().unwrap().name, "Eleven");
        assert_eq!(resolver.cached(&id("11")).unwrap().name, "Eleven");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(resolver.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_resolve_during_cleared_lookup_joins_it() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::gated(Arc::clone(&gate)).with_app("12", "Twelve", 3.0));
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let first = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&id("12")).await })
        };
        let check = Arc::clone(&fetcher);
        wait_until(move || check.calls() == 1).await;

        resolver.clear();
        let second = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(&id("12")).await })
        };
        let stats_resolver = resolver.clone();
        wait_until(move || stats_resolver.stats().coalesced == 1).await;
        gate.notify_one();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.cached(&id("12")).is_some());
        assert_eq!(fetcher.calls(), 1);
    }

    fn disk_resolver(
        fetcher: Arc<FakeFetcher>,
        clock: Arc<ManualClock>,
        dir: &TempDir,
        config: ResolverConfig,
    ) -> MetadataResolver {
        let config = ResolverConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..config
        };
        MetadataResolver::with_clock(fetcher, clock, config).unwrap()
    }

    #[tokio::test]
    async fn test_stale_disk_entry_served_after_network_failure() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());

        let warm = disk_resolver(
            Arc::new(FakeFetcher::new().with_app("13", "Thirteen", 4.2)),
            Arc::clone(&clock),
            &temp_dir,
            ResolverConfig::default(),
        );
        warm.resolve(&id("13")).await.unwrap();
        clock.advance(Duration::hours(25));

        let offline = Arc::new(FakeFetcher::new());
        offline.set("13", Err(ResolveError::Network("offline".into())));
        let config = ResolverConfig {
            serve_stale_on_error: true,
            ..Default::default()
        };
        let cold = disk_resolver(Arc::clone(&offline), Arc::clone(&clock), &temp_dir, config);

        let stale = cold.resolve(&id("13")).await.unwrap();
        assert_eq!(stale.name, "Thirteen");
        assert_eq!(offline.calls(), 1, "A refresh must be attempted first");
        assert_eq!(cold.stats().fetches, 1);
        assert_eq!(cold.stats().disk_hits, 0);
    }

    #[tokio::test]
    async fn test_not_found_never_falls_back_to_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());

        let warm = disk_resolver(
            Arc::new(FakeFetcher::new().with_app("14", "Fourteen", 4.0)),
            Arc::clone(&clock),
            &temp_dir,
            ResolverConfig::default(),
        );
        warm.resolve(&id("14")).await.unwrap();
        clock.advance(Duration::hours(25));

        let removed = Arc::new(FakeFetcher::new());
        let config = ResolverConfig {
            serve_stale_on_error: true,
            ..Default::default()
        };
        let cold = disk_resolver(Arc::clone(&removed), Arc::clone(&clock), &temp_dir, config);

        let err = cold.resolve(&id("14")).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound(id("14")));
        assert_eq!(removed.calls(), 1);
        assert!(cold.cached(&id("14")).is_none());
    }

    #[tokio::test]
    async fn test_disk_entry_capped_by_shorter_ttl() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());

        let long_lived = disk_resolver(
            Arc::new(FakeFetcher::new().with_app("15", "Old", 3.0)),
            Arc::clone(&clock),
            &temp_dir,
            ResolverConfig::default(),
        );
        long_lived.resolve(&id("15")).await.unwrap();

        let fetcher = Arc::new(FakeFetcher::new().with_app("15", "New", 4.0));
        let config = ResolverConfig {
            ttl: Duration::hours(2),
            ..Default::default()
        };
        let short_lived = disk_resolver(Arc::clone(&fetcher), Arc::clone(&clock), &temp_dir, config);

        clock.advance(Duration::hours(1));
        assert_eq!(short_lived.resolve(&id("15")).await.unwrap().name, "Old");
        assert_eq!(fetcher.calls(), 0);

        clock.advance(Duration::hours(1));
        assert!(short_lived.cached(&id("15")).is_none());
        assert_eq!(short_lived.resolve(&id("15")).await.unwrap().name, "New");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_disk_entry_older_than_short_ttl_is_refetched() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());

        let long_lived = disk_resolver(
            Arc::new(FakeFetcher::new().with_app("16", "Old", 3.0)),
            Arc::clone(&clock),
            &temp_dir,
            ResolverConfig::default(),
        );
        long_lived.resolve(&id("16")).await.unwrap();
        clock.advance(Duration::hours(3));

        let fetcher = Arc::new(FakeFetcher::new().with_app("16", "New", 4.0));
        let config = ResolverConfig {
            ttl: Duration::hours(2),
            ..Default::default()
        };
        let short_lived = disk_resolver(Arc::clone(&fetcher), Arc::clone(&clock), &temp_dir, config);

        assert_eq!(short_lived.resolve(&id("16")).await.unwrap().name, "New");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(short_lived.stats().disk_hits, 0);
    }

    #[tokio::test]
    async fn test_resolve_configuration_builds_cards_and_failures() {
        let fetcher = Arc::new(
            FakeFetcher::new()
                .with_app("6747951776", "Cartoonify Me", 4.8)
                .with_app("389801252", "Instagram", 4.6),
        );
        let resolver = resolver(Arc::clone(&fetcher), Arc::new(ManualClock::default()));

        let mut config = AppsConfiguration::sample();
        config.apps.push(AppConfig::new("https://apps.apple.com/app/id404"));
        config.apps.push(AppConfig::new("not an app link"));

        let section = resolver.resolve_configuration(&config).await;

        assert_eq!(section.title, "My Other Apps");
        assert_eq!(section.cards.len(), 2);
        assert_eq!(section.cards[0].title, "Cartoonify Me");
        assert!(section.cards[0].featured);
        assert_eq!(section.cards[1].title, "Instagram");
        assert_eq!(section.failures.len(), 2);
        assert!(matches!(
            section.failures[0].error,
            EntryError::Resolve(ResolveError::NotFound(_))
        ));
        assert!(matches!(section.failures[1].error, EntryError::Identifier(_)));
    }

    #[test]
    fn test_config_validation() {
        assert!(ResolverConfig::default().validate().is_ok());

        let zero_ttl = ResolverConfig {
            ttl: Duration::zero(),
            ..Default::default()
        };
        assert!(matches!(
            zero_ttl.validate(),
            Err(ResolverConfigError::NonPositiveTtl(_))
        ));

        let negative = ResolverConfig {
            failure_cooldown: Duration::seconds(-1),
            ..Default::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(ResolverConfigError::NegativeCooldown(_))
        ));
    }
}
