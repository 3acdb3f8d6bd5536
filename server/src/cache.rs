use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use feed_mcp_core::fnv;
use feed_mcp_core::uri::ResourceKind;
use moka::future::Cache;
use moka::Expiry;
use tracing::debug;

const DEFAULT_ALL_TTL_SECS: u64 = 5 * 60;
const DEFAULT_ITEMS_TTL_SECS: u64 = 10 * 60;
const DEFAULT_META_TTL_SECS: u64 = 15 * 60;
const DEFAULT_MAX_COST: u64 = 10_000;

/// A hook invoked, outside the cache's critical section, whenever an entry
/// is invalidated. Receives the affected identifier, or `"*"` for a
/// wildcard clear.
pub type InvalidationHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub all_ttl: Duration,
    pub items_ttl: Duration,
    pub meta_ttl: Duration,
    pub max_cost: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            all_ttl: Duration::from_secs(DEFAULT_ALL_TTL_SECS),
            items_ttl: Duration::from_secs(DEFAULT_ITEMS_TTL_SECS),
            meta_ttl: Duration::from_secs(DEFAULT_META_TTL_SECS),
            max_cost: DEFAULT_MAX_COST,
        }
    }
}

impl CacheConfig {
    /// Any non-positive override falls back to the documented default
    /// rather than being treated as an error.
    pub fn from_overrides(
        all_ttl_secs: Option<i64>,
        items_ttl_secs: Option<i64>,
        meta_ttl_secs: Option<i64>,
        max_cost: Option<i64>,
    ) -> Self {
        let default = Self::default();
        Self {
            all_ttl: positive_secs(all_ttl_secs).unwrap_or(default.all_ttl),
            items_ttl: positive_secs(items_ttl_secs).unwrap_or(default.items_ttl),
            meta_ttl: positive_secs(meta_ttl_secs).unwrap_or(default.meta_ttl),
            max_cost: max_cost.filter(|v| *v > 0).map(|v| v as u64).unwrap_or(default.max_cost),
        }
    }
}

fn positive_secs(value: Option<i64>) -> Option<Duration> {
    value.filter(|v| *v > 0).map(|v| Duration::from_secs(v as u64))
}

/// Builds the cache key for a resource identifier: `resource:<scheme>://
/// <host><path>`, with a `?hash=<fnv1a64>` suffix derived from the raw query
/// string when one is present, so two requests differing only in filter
/// parameters never collide.
pub fn cache_key(identifier: &str) -> String {
    let (base, query) = match identifier.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (identifier, None),
    };
    match query {
        Some(q) if !q.is_empty() => format!("resource:{base}?hash={:x}", fnv::fnv1a64(q.as_bytes())),
        _ => format!("resource:{base}"),
    }
}

fn ttl_for(kind: &ResourceKind, config: &CacheConfig) -> Duration {
    match kind {
        ResourceKind::All => config.all_ttl,
        ResourceKind::FeedItems(_) => config.items_ttl,
        ResourceKind::FeedMeta(_) => config.meta_ttl,
        ResourceKind::FeedFull(_) => config.items_ttl,
    }
}

/// One stored entry: the rendered payload plus the kind it was rendered
/// for, so the cache can look up its own TTL class at expiry time without
/// the caller having to re-pass it on every `get`.
#[derive(Clone)]
struct CachedEntry {
    kind: ResourceKind,
    value: String,
}

/// Per-entry TTL policy keyed off the stored [`ResourceKind`], implementing
/// the three-tier all/items/meta TTL split as one `moka` cache rather than
/// three separate instances: `moka::Expiry` is evaluated once per insert, so
/// this is equivalent cost-wise and avoids splitting capacity three ways.
struct TieredExpiry {
    config: CacheConfig,
}

impl Expiry<String, CachedEntry> for TieredExpiry {
    fn expire_after_create(&self, _key: &String, value: &CachedEntry, _created_at: Instant) -> Option<Duration> {
        Some(ttl_for(&value.kind, &self.config))
    }
}

/// TTL-scoped content cache keyed by identifier+parameter-hash, with
/// hook-driven invalidation and approximate hit/miss/invalidation counters.
///
/// Backed by `moka`'s async cache, which is itself internally synchronised
/// and eventually consistent on `set`: a `get` immediately following a `set`
/// may still miss. Callers must tolerate that; it is not a bug.
pub struct ResourceCache {
    store: Cache<String, CachedEntry>,
    config: CacheConfig,
    hooks: std::sync::RwLock<Vec<InvalidationHook>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        let store = Cache::builder()
            .max_capacity(config.max_cost)
            .expire_after(TieredExpiry { config: config.clone() })
            .build();
        Self {
            store,
            config,
            hooks: std::sync::RwLock::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn register_hook(&self, hook: InvalidationHook) {
        self.hooks.write().expect("cache hook lock poisoned").push(hook);
    }

    pub async fn get(&self, identifier: &str) -> Option<String> {
        let key = cache_key(identifier);
        let value = self.store.get(&key).await;
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value.map(|entry| entry.value)
    }

    pub async fn set(&self, kind: &ResourceKind, identifier: &str, value: String) {
        let key = cache_key(identifier);
        let ttl = ttl_for(kind, &self.config);
        self.store.insert(key, CachedEntry { kind: kind.clone(), value }).await;
        debug!(identifier, ttl_secs = ttl.as_secs(), "cache populated");
    }

    /// Removes the single entry for `identifier` and fires hooks with that
    /// identifier.
    pub async fn delete(&self, identifier: &str) {
        let key = cache_key(identifier);
        self.store.invalidate(&key).await;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.fire_hooks(identifier);
    }

    /// Invalidates the full, items, and meta identifiers for a feed.
    pub async fn invalidate_feed(&self, feed_id: &str) {
        for kind in ResourceKind::triple_for(feed_id) {
            self.delete(&kind.expand()).await;
        }
    }

    /// Clears the entire store and fires hooks with `"*"`.
    pub async fn clear(&self) {
        self.store.invalidate_all();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.fire_hooks("*");
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    fn fire_hooks(&self, identifier: &str) {
        let hooks = self.hooks.read().expect("cache hook lock poisoned").clone();
        for hook in hooks {
            hook(identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn cache_keys_differ_by_query() {
        let k1 = cache_key("feeds://feed/x/items?limit=2");
        let k2 = cache_key("feeds://feed/x/items?limit=3");
        let k3 = cache_key("feeds://feed/x/items");
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn non_positive_overrides_fall_back_to_defaults() {
        let config = CacheConfig::from_overrides(Some(-1), Some(0), None, Some(-5));
        let default = CacheConfig::default();
        assert_eq!(config.all_ttl, default.all_ttl);
        assert_eq!(config.items_ttl, default.items_ttl);
        assert_eq!(config.meta_ttl, default.meta_ttl);
        assert_eq!(config.max_cost, default.max_cost);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = ResourceCache::new(CacheConfig::default());
        let kind = ResourceKind::All;
        cache.set(&kind, "feeds://all", "payload".to_string()).await;
        // moka's set is eventually visible; poll briefly rather than assume
        // the very next get is a hit.
        for _ in 0..50 {
            if cache.get("feeds://all").await.as_deref() == Some("payload") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected eventual visibility of the set value");
    }

    #[tokio::test]
    async fn delete_fires_hooks_with_identifier() {
        let cache = ResourceCache::new(CacheConfig::default());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        cache.register_hook(Arc::new(move |id: &str| seen_clone.lock().unwrap().push(id.to_string())));
        cache.delete("feeds://feed/x").await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["feeds://feed/x"]);
    }

    #[tokio::test]
    async fn clear_fires_hooks_with_wildcard() {
        let cache = ResourceCache::new(CacheConfig::default());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        cache.register_hook(Arc::new(move |id: &str| seen_clone.lock().unwrap().push(id.to_string())));
        cache.clear().await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["*"]);
    }
}
