use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::getter::{Getter, GetterRequest};
use crate::layer::Layer;
use crate::lookup::ViewKey;
use crate::resolution::Resolution;
use crate::stack::{Config, StackView};

pub const DEFAULT_TTL_MS: u64 = 5_000;
pub const DEFAULT_ERROR_TTL_MS: u64 = 1_000;

/// How long each kind of outcome stays fresh. `None` never expires; zero
/// retries on the next lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CachePolicy {
    pub ttl_ms: Option<u64>,
    pub miss_ttl_ms: Option<u64>,
    pub error_ttl_ms: Option<u64>,
    /// Key layer entries by the stack below as well as the address. Needed
    /// when the wrapped layer consults `below`.
    pub scope_by_context: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl_ms: Some(DEFAULT_TTL_MS),
            miss_ttl_ms: Some(DEFAULT_TTL_MS),
            error_ttl_ms: Some(DEFAULT_ERROR_TTL_MS),
            scope_by_context: false,
        }
    }
}

impl CachePolicy {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|err| Error::Config(format!("failed to parse cache policy: {err}")))
    }

    pub fn forever() -> Self {
        Self {
            ttl_ms: None,
            miss_ttl_ms: None,
            error_ttl_ms: None,
            scope_by_context: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl_ms = ttl.map(as_millis);
        self
    }

    pub fn with_miss_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.miss_ttl_ms = ttl.map(as_millis);
        self
    }

    pub fn with_error_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.error_ttl_ms = ttl.map(as_millis);
        self
    }

    pub fn scoped_by_context(mut self) -> Self {
        self.scope_by_context = true;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    pub fn miss_ttl(&self) -> Option<Duration> {
        self.miss_ttl_ms.map(Duration::from_millis)
    }

    pub fn error_ttl(&self) -> Option<Duration> {
        self.error_ttl_ms.map(Duration::from_millis)
    }

    fn lifetime(&self, outcome: &Result<Resolution>) -> Option<Duration> {
        match outcome {
            Ok(Resolution::Hit(_)) => self.ttl(),
            Ok(Resolution::Miss | Resolution::Stop) => self.miss_ttl(),
            Err(err) if err.is_lookup_scoped() => Some(Duration::ZERO),
            Err(_) => self.error_ttl(),
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub context: Option<ViewKey>,
}

impl CacheKey {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            context: None,
        }
    }

    pub fn in_context(path: impl Into<String>, context: ViewKey) -> Self {
        Self {
            path: path.into(),
            context: Some(context),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub executions: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    outcome: Result<Resolution>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

#[derive(Debug, Default)]
struct Slot {
    cell: OnceCell<Entry>,
}

impl Slot {
    /// Completed and past its lifetime. An in-flight slot is never stale.
    fn is_stale(&self, now: Instant) -> bool {
        self.cell.get().is_some_and(|entry| !entry.is_live(now))
    }
}

/// Outcome cache with single-flight resolution. Fresh reads take only the
/// shared lock; concurrent resolutions of one key wait on that key's cell,
/// never on the map.
#[derive(Debug, Default)]
pub struct Cache {
    policy: CachePolicy,
    slots: RwLock<HashMap<CacheKey, Arc<Slot>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    executions: AtomicU64,
}

impl Cache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the live outcome for `key` or runs `resolve` once for every
    /// concurrent caller. A failure that belongs to the flight owner's lookup
    /// (its cancellation, deadline or expansion chain) is never kept; each
    /// waiter then resolves again under its own lookup.
    pub async fn get_or_resolve<F, Fut>(&self, key: CacheKey, resolve: F) -> Result<Resolution>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Resolution>>,
    {
        loop {
            if let Some(outcome) = self.fresh(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(path = %key.path, "cache hit");
                return outcome;
            }

            let slot = self.claim(&key);
            let executed = AtomicBool::new(false);
            let entry = slot
                .cell
                .get_or_init(|| async {
                    executed.store(true, Ordering::Relaxed);
                    self.executions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(path = %key.path, "cache miss; resolving");
                    let outcome = resolve().await;
                    let expires_at = self
                        .policy
                        .lifetime(&outcome)
                        .map(|lifetime| Instant::now() + lifetime);
                    Entry {
                        outcome,
                        expires_at,
                    }
                })
                .await;

            let outcome = entry.outcome.clone();
            let scoped = matches!(&outcome, Err(err) if err.is_lookup_scoped());
            if scoped {
                self.evict(&key, &slot);
            }

            if executed.load(Ordering::Relaxed) {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return outcome;
            }
            if scoped {
                tracing::debug!(
                    path = %key.path,
                    "shared resolution failed for its own lookup; retrying"
                );
                continue;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return outcome;
        }
    }

    fn fresh(&self, key: &CacheKey) -> Option<Result<Resolution>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let entry = slots.get(key)?.cell.get()?;
        entry.is_live(Instant::now()).then(|| entry.outcome.clone())
    }

    fn claim(&self, key: &CacheKey) -> Arc<Slot> {
        let now = Instant::now();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(key).filter(|slot| !slot.is_stale(now)) {
            return slot.clone();
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), slot.clone());
        slot
    }

    fn evict(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }

    /// Drops every entry for `path`, whatever its context.
    pub fn invalidate(&self, path: &str) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|key, _| key.path != path);
        tracing::debug!(path, "cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_stale(now));
        before - slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// A layer whose outcomes are cached per address.
pub struct CachedLayer<L> {
    name: String,
    inner: L,
    cache: Arc<Cache>,
}

impl<L: Layer> CachedLayer<L> {
    pub fn new(inner: L, policy: CachePolicy) -> Self {
        Self::with_cache(inner, Arc::new(Cache::new(policy)))
    }

    pub fn with_cache(inner: L, cache: Arc<Cache>) -> Self {
        Self {
            name: format!("cached:{}", inner.name()),
            inner,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: Layer> Layer for CachedLayer<L> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution> {
        let key = if self.cache.policy().scope_by_context {
            CacheKey::in_context(address.full(), below.key())
        } else {
            CacheKey::new(address.full())
        };
        self.cache
            .get_or_resolve(key, || self.inner.resolve(address, below))
            .await
    }

    fn expands_templates(&self) -> bool {
        self.inner.expands_templates()
    }

    fn embedded(&self) -> Option<&Config> {
        self.inner.embedded()
    }
}

/// A getter whose outcomes are cached by the full requested address.
pub struct CachedGetter<G> {
    inner: G,
    cache: Arc<Cache>,
}

impl<G: Getter> CachedGetter<G> {
    pub fn new(inner: G, policy: CachePolicy) -> Self {
        Self::with_cache(inner, Arc::new(Cache::new(policy)))
    }

    pub fn with_cache(inner: G, cache: Arc<Cache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }
}

#[async_trait]
impl<G: Getter> Getter for CachedGetter<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        let path = request.address().full();
        let key = if self.cache.policy().scope_by_context {
            CacheKey::in_context(path, below.key())
        } else {
            CacheKey::new(path)
        };
        self.cache
            .get_or_resolve(key, || self.inner.handle(request, below))
            .await
    }
}
