use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use feed_mcp_core::error::{AppError, ErrorKind};
use feed_mcp_core::fnv;
use feed_mcp_core::model::{FeedListPayload, FeedMetaPayload};
use feed_mcp_core::session::Session;
use feed_mcp_core::traits::{FeedStore, ImageStore, ResourceNotifier};
use feed_mcp_core::uri::{self, ResourceKind};
use feed_mcp_core::{filter, uri::query_string};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::ResourceCache;
use crate::images;
use crate::payload::{FullFeedPayload, ItemsPayload};

/// One entry of the resource list served to clients: identifier, display
/// name, description, and MIME type.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: &'static str,
}

/// One resource-contents entry, the unit a read handler returns.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: &'static str,
    pub text: String,
}

/// Owns the session map, the pending-notifications set, and the per-
/// identifier change digests; renders resource reads by delegating to the
/// feed store and filter engine, through the resource cache.
///
/// The session map is guarded by a single readers-writer lock, per the
/// concurrency design; each session additionally guards its own
/// subscription set with its own lock so the outer lock is never held while
/// mutating one session's subscriptions.
pub struct ResourceManager {
    feed_store: Arc<dyn FeedStore>,
    image_store: Arc<dyn ImageStore>,
    cache: Arc<ResourceCache>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    pending: std::sync::Mutex<HashSet<String>>,
    digests: std::sync::Mutex<HashMap<String, u64>>,
    session_counter: AtomicU64,
}

impl ResourceManager {
    pub fn new(feed_store: Arc<dyn FeedStore>, image_store: Arc<dyn ImageStore>, cache: Arc<ResourceCache>) -> Self {
        Self {
            feed_store,
            image_store,
            cache,
            sessions: RwLock::new(HashMap::new()),
            pending: std::sync::Mutex::new(HashSet::new()),
            digests: std::sync::Mutex::new(HashMap::new()),
            session_counter: AtomicU64::new(0),
        }
    }

    /// Scoped, process-wide session-naming counter — the only piece of
    /// genuinely global mutable state in the resource layer.
    pub fn next_session_id(&self) -> String {
        let n = self.session_counter.fetch_add(1, Ordering::Relaxed);
        format!("session-{n}")
    }

    pub async fn create_session(&self) -> String {
        let id = self.next_session_id();
        self.sessions.write().await.insert(id.clone(), Arc::new(Session::new(id.clone())));
        info!(session_id = %id, "session created");
        id
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        info!(session_id, "session removed");
    }

    async fn get_session(&self, session_id: &str) -> Result<Arc<Session>, AppError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::session_not_found(session_id))
    }

    /// Inserts a session for `session_id` if one doesn't already exist.
    /// Used by the protocol surface, which reuses the transport's own peer
    /// identity as the session key rather than minting one via
    /// `create_session`, so the first subscribe from a given peer needs a
    /// session object to subscribe into.
    pub async fn ensure_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id.to_string()).or_insert_with(|| Arc::new(Session::new(session_id.to_string())));
    }

    /// Stores the peer handle used to push real `ResourceUpdated`
    /// notifications to this session.
    pub async fn set_session_notifier(&self, session_id: &str, notifier: Arc<dyn ResourceNotifier>) -> Result<(), AppError> {
        let session = self.get_session(session_id).await?;
        session.set_notifier(notifier);
        Ok(())
    }

    /// Delivers a `ResourceUpdated` push to `session_id`'s stored notifier,
    /// if one has been set. A session with no notifier (never subscribed
    /// through the live protocol surface) is a silent no-op, not an error.
    pub async fn notify_session(&self, session_id: &str, uri: &str) -> Result<(), AppError> {
        let session = self.get_session(session_id).await?;
        match session.notifier() {
            Some(notifier) => notifier.notify_resource_updated(uri).await,
            None => Ok(()),
        }
    }

    pub async fn subscribe(&self, session_id: &str, identifier: &str) -> Result<(), AppError> {
        let session = self.get_session(session_id).await?;
        let added = session.subscribe(identifier.to_string());
        debug!(session_id, identifier, added, "subscribe");
        Ok(())
    }

    pub async fn unsubscribe(&self, session_id: &str, identifier: &str) -> Result<(), AppError> {
        let session = self.get_session(session_id).await?;
        let removed = session.unsubscribe(identifier);
        debug!(session_id, identifier, removed, "unsubscribe");
        Ok(())
    }

    /// Sessions currently subscribed to `identifier`.
    pub async fn get_subscribed_sessions(&self, identifier: &str) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.is_subscribed(identifier))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Union of every identifier subscribed by any session.
    pub async fn get_all_subscribed_uris(&self) -> HashSet<String> {
        let sessions = self.sessions.read().await;
        sessions.values().flat_map(|s| s.subscriptions()).collect()
    }

    /// Invalidation hook: marks `identifier` pending only when at least one
    /// session is currently subscribed to it, and never for the wildcard.
    pub async fn on_cache_invalidated(&self, identifier: &str) {
        if identifier == "*" {
            return;
        }
        if self.get_subscribed_sessions(identifier).await.is_empty() {
            return;
        }
        self.pending.lock().expect("pending set lock poisoned").insert(identifier.to_string());
    }

    /// Invalidates a feed's full/items/meta identifiers after a successful
    /// dynamic-feed-manager mutation (add/remove/refresh/pause/resume).
    pub async fn invalidate_feed(&self, feed_id: &str) {
        self.cache.invalidate_feed(feed_id).await;
    }

    /// Atomically returns and clears the pending-notifications set.
    pub fn drain_pending_notifications(&self) -> HashSet<String> {
        let mut pending = self.pending.lock().expect("pending set lock poisoned");
        std::mem::take(&mut *pending)
    }

    /// Enumerates every resource this server can serve: the feed list, plus
    /// full/items/meta for each feed currently in the store.
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, AppError> {
        let feeds = self.feed_store.list_all_feeds().await.map_err(|e| wrap_store_error(e, "feeds://all", "resource_manager::list"))?;

        let mut resources = vec![ResourceDescriptor {
            uri: ResourceKind::All.expand(),
            name: "All Feeds".to_string(),
            description: "List of all aggregated syndication feeds".to_string(),
            mime_type: "application/json",
        }];

        for feed in &feeds {
            resources.push(ResourceDescriptor {
                uri: ResourceKind::FeedFull(feed.id.clone()).expand(),
                name: format!("Feed: {}", feed.title),
                description: format!("Full feed descriptor and items for {}", feed.title),
                mime_type: "application/json",
            });
            resources.push(ResourceDescriptor {
                uri: ResourceKind::FeedItems(feed.id.clone()).expand(),
                name: format!("Feed: {} — items", feed.title),
                description: format!("Items only for {}", feed.title),
                mime_type: "application/json",
            });
            resources.push(ResourceDescriptor {
                uri: ResourceKind::FeedMeta(feed.id.clone()).expand(),
                name: format!("Feed: {} — metadata", feed.title),
                description: format!("Descriptor metadata for {}", feed.title),
                mime_type: "application/json",
            });
        }

        Ok(resources)
    }

    /// Reads one resource identifier, consulting the cache first.
    pub async fn read(&self, identifier: &str) -> Result<ResourceContents, AppError> {
        if let Some(text) = self.cache.get(identifier).await {
            return Ok(ResourceContents {
                uri: identifier.to_string(),
                mime_type: "application/json",
                text,
            });
        }

        let kind = uri::parse(identifier)?;
        let text = self.render_payload(&kind, identifier).await?;
        self.cache.set(&kind, identifier, text.clone()).await;
        Ok(ResourceContents {
            uri: identifier.to_string(),
            mime_type: "application/json",
            text,
        })
    }

    /// Computes the serialised payload for `identifier` directly against
    /// the feed store, bypassing the cache. Used both by `read` on a cache
    /// miss and by change detection, which needs a fresh digest.
    async fn render_payload(&self, kind: &ResourceKind, identifier: &str) -> Result<String, AppError> {
        let query_present = query_string(identifier).is_some();

        match kind {
            ResourceKind::All => {
                let feeds = self
                    .feed_store
                    .list_all_feeds()
                    .await
                    .map_err(|e| wrap_store_error(e, identifier, "resource_manager::read"))?;
                let payload = FeedListPayload::new(&feeds);
                serialize(&payload, identifier)
            }
            ResourceKind::FeedMeta(id) => {
                let feed_and_items = self
                    .feed_store
                    .get_feed_and_items(id)
                    .await
                    .map_err(|e| wrap_store_error(e, identifier, "resource_manager::read"))?;
                let payload = FeedMetaPayload::from(&feed_and_items.feed);
                serialize(&payload, identifier)
            }
            ResourceKind::FeedItems(id) => {
                let mut feed_and_items = self
                    .feed_store
                    .get_feed_and_items(id)
                    .await
                    .map_err(|e| wrap_store_error(e, identifier, "resource_manager::read"))?;
                let params = filter::parse(identifier)?;
                let original_count = feed_and_items.items.len();
                feed_and_items.items = filter::apply(&feed_and_items.items, &params);
                let filter_info = filter::summary(original_count, feed_and_items.items.len(), &params);
                let images = self.maybe_collect_images(identifier, &feed_and_items.items).await;
                let payload = ItemsPayload {
                    count: feed_and_items.items.len(),
                    items: feed_and_items.items,
                    filter_info: Some(filter_info),
                    updated_at: chrono::Utc::now(),
                    images,
                };
                serialize(&payload, identifier)
            }
            ResourceKind::FeedFull(id) => {
                let mut feed_and_items = self
                    .feed_store
                    .get_feed_and_items(id)
                    .await
                    .map_err(|e| wrap_store_error(e, identifier, "resource_manager::read"))?;

                if !query_present {
                    return serialize(&feed_and_items, identifier);
                }

                let params = filter::parse(identifier)?;
                let original_count = feed_and_items.items.len();
                feed_and_items.items = filter::apply(&feed_and_items.items, &params);
                let filter_info = filter::summary(original_count, feed_and_items.items.len(), &params);
                let images = self.maybe_collect_images(identifier, &feed_and_items.items).await;
                let payload = FullFeedPayload {
                    filter_info,
                    updated_at: chrono::Utc::now(),
                    images,
                    feed_result: feed_and_items,
                };
                serialize(&payload, identifier)
            }
        }
    }

    async fn maybe_collect_images(
        &self,
        identifier: &str,
        items: &[feed_mcp_core::model::Item],
    ) -> Option<Vec<crate::payload::ImageReference>> {
        let raw_query = query_string(identifier)?;
        let include = query_flag(&raw_query, "includeImages");
        if !include {
            return None;
        }
        let embed = query_flag(&raw_query, "embedImages");
        Some(images::collect_images(items, embed, &self.image_store).await)
    }

    /// Periodic change-detection sweep (§4.4, refined by §4.4A): always
    /// reports identifiers drained from the pending set verbatim, then
    /// additionally recomputes `feeds://all` and every current feed's three
    /// identifiers, reporting only those whose payload digest actually
    /// moved since the previous tick.
    pub async fn detect_resource_changes(&self) -> Vec<String> {
        let pending = self.drain_pending_notifications();
        let mut changed: Vec<String> = pending.iter().cloned().collect();

        let mut candidates = vec![ResourceKind::All.expand()];
        match self.feed_store.list_all_feeds().await {
            Ok(feeds) => {
                for feed in &feeds {
                    for kind in ResourceKind::triple_for(&feed.id) {
                        candidates.push(kind.expand());
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "change detection could not list feeds, skipping digest refresh");
            }
        }

        for candidate in candidates {
            if pending.contains(&candidate) {
                continue;
            }
            let kind = match uri::parse(&candidate) {
                Ok(kind) => kind,
                Err(_) => continue,
            };
            match self.render_payload(&kind, &candidate).await {
                Ok(text) => {
                    let digest = fnv::fnv1a64(text.as_bytes());
                    let mut digests = self.digests.lock().expect("digest map lock poisoned");
                    let prior = digests.get(&candidate).copied();
                    if prior != Some(digest) {
                        digests.insert(candidate.clone(), digest);
                        drop(digests);
                        changed.push(candidate);
                    }
                }
                Err(err) => {
                    warn!(identifier = %candidate, error = %err, "change detection render failed, skipping identifier");
                }
            }
        }

        changed
    }
}

fn query_flag(raw_query: &str, name: &str) -> bool {
    raw_query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .any(|(k, v)| k == name && (v.eq_ignore_ascii_case("true") || v == "1"))
}

fn wrap_store_error(e: AppError, identifier: &str, operation: &str) -> AppError {
    let kind = if e.message.to_ascii_lowercase().contains("not found") {
        ErrorKind::ResourceNotFound
    } else {
        ErrorKind::ResourceUnavailable
    };
    AppError::new(kind, operation, "resource_manager", e.message.clone())
        .with_key(identifier)
        .with_source(e)
}

fn serialize<T: Serialize>(value: &T, identifier: &str) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| {
        AppError::new(ErrorKind::ResourceContent, "resource_manager::read", "resource_manager", e.to_string()).with_key(identifier)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::testutil::{FakeFeedStore, FakeImageStore};

    fn manager(store: FakeFeedStore) -> ResourceManager {
        ResourceManager::new(
            Arc::new(store),
            Arc::new(FakeImageStore::always_succeeds()),
            Arc::new(ResourceCache::new(CacheConfig::default())),
        )
    }

    #[tokio::test]
    async fn reading_all_feeds_lists_every_descriptor() {
        let mgr = manager(FakeFeedStore::with_sample_feeds());
        let contents = mgr.read("feeds://all").await.unwrap();
        assert!(contents.text.contains("tech-blog"));
        assert!(contents.text.contains("science-daily"));
    }

    #[tokio::test]
    async fn repeated_reads_return_identical_payloads() {
        // moka's cache population is eventually visible, so this only
        // asserts content stability, not that the second read is a hit.
        let mgr = manager(FakeFeedStore::with_sample_feeds());
        let first = mgr.read("feeds://all").await.unwrap();
        let second = mgr.read("feeds://all").await.unwrap();
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn invalid_identifier_is_rejected_before_touching_the_store() {
        let mgr = manager(FakeFeedStore::empty());
        let err = mgr.read("not-a-resource-uri").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResourceUri);
    }

    #[tokio::test]
    async fn unknown_feed_id_surfaces_resource_not_found() {
        let mgr = manager(FakeFeedStore::empty());
        let err = mgr.read("feeds://feed/no-such-feed").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn subscribing_without_a_session_is_session_not_found() {
        let mgr = manager(FakeFeedStore::empty());
        let err = mgr.subscribe("no-such-session", "feeds://all").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn change_detection_reports_an_invalidated_subscribed_identifier() {
        let mgr = manager(FakeFeedStore::with_sample_feeds());
        let session = mgr.create_session().await;
        mgr.subscribe(&session, "feeds://all").await.unwrap();
        mgr.read("feeds://all").await.unwrap();

        mgr.on_cache_invalidated("feeds://all").await;
        let changed = mgr.detect_resource_changes().await;
        assert!(changed.contains(&"feeds://all".to_string()));
    }

    struct RecordingNotifier {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl feed_mcp_core::traits::ResourceNotifier for RecordingNotifier {
        async fn notify_resource_updated(&self, uri: &str) -> Result<(), AppError> {
            self.seen.lock().unwrap().push(uri.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent_and_enables_subscribe() {
        let mgr = manager(FakeFeedStore::empty());
        mgr.ensure_session("peer-1").await;
        mgr.ensure_session("peer-1").await;
        mgr.subscribe("peer-1", "feeds://all").await.unwrap();
    }

    #[tokio::test]
    async fn notify_session_delivers_through_the_stored_notifier() {
        let mgr = manager(FakeFeedStore::empty());
        mgr.ensure_session("peer-1").await;
        let notifier = Arc::new(RecordingNotifier { seen: std::sync::Mutex::new(Vec::new()) });
        mgr.set_session_notifier("peer-1", notifier.clone()).await.unwrap();

        mgr.notify_session("peer-1", "feeds://all").await.unwrap();
        assert_eq!(notifier.seen.lock().unwrap().as_slice(), ["feeds://all"]);
    }

    #[tokio::test]
    async fn notify_session_without_a_notifier_is_a_silent_no_op() {
        let mgr = manager(FakeFeedStore::empty());
        mgr.ensure_session("peer-1").await;
        mgr.notify_session("peer-1", "feeds://all").await.unwrap();
    }

    #[tokio::test]
    async fn change_detection_ignores_the_wildcard_invalidation_marker() {
        let mgr = manager(FakeFeedStore::with_sample_feeds());
        let session = mgr.create_session().await;
        mgr.subscribe(&session, "feeds://all").await.unwrap();
        mgr.on_cache_invalidated("*").await;
        assert!(mgr.drain_pending_notifications().is_empty());
    }
}
