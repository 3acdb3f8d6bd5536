use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use feed_mcp_core::error::{AppError, ErrorKind};
use feed_mcp_core::model::{FeedAndItems, FeedDescriptor, FeedDocument, Item};
use feed_mcp_core::traits::{
    AddFeedRequest, DynamicFeedManager, FeedStore, FetchedImage, ImageStore, ManagedFeedInfo, RemovedFeedInfo, UpdateFeedMetadataRequest,
};
use feed_mcp_server::cache::{CacheConfig, ResourceCache};
use feed_mcp_server::resource_manager::ResourceManager;

/// A `FeedStore` over a fixed in-memory snapshot, standing in for a real
/// aggregated corpus.
struct FakeFeedStore {
    feeds: Mutex<HashMap<String, FeedAndItems>>,
}

impl FakeFeedStore {
    fn with_two_feeds() -> Self {
        let mut feeds = HashMap::new();
        feeds.insert(
            "alpha".to_string(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: "alpha".to_string(),
                    public_url: "https://example.com/alpha.xml".to_string(),
                    title: "Alpha Feed".to_string(),
                    fetch_error: None,
                    circuit_breaker_open: false,
                    document: FeedDocument::default(),
                },
                items: vec![Item {
                    title: "Alpha item one".to_string(),
                    published: Some(Utc::now()),
                    ..Default::default()
                }],
            },
        );
        feeds.insert(
            "beta".to_string(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: "beta".to_string(),
                    public_url: "https://example.com/beta.xml".to_string(),
                    title: "Beta Feed".to_string(),
                    fetch_error: None,
                    circuit_breaker_open: false,
                    document: FeedDocument::default(),
                },
                items: vec![],
            },
        );
        Self { feeds: Mutex::new(feeds) }
    }
}

#[async_trait]
impl FeedStore for FakeFeedStore {
    async fn list_all_feeds(&self) -> Result<Vec<FeedDescriptor>, AppError> {
        Ok(self.feeds.lock().unwrap().values().map(|f| f.feed.clone()).collect())
    }

    async fn get_feed_and_items(&self, id: &str) -> Result<FeedAndItems, AppError> {
        self.feeds
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "get_feed_and_items", "feed_store", format!("feed {id} not found")).with_key(id))
    }
}

/// A `DynamicFeedManager` over the same snapshot, so add/remove exercise the
/// resource manager's post-mutation invalidation contract.
struct FakeDynamicFeedManager {
    store: Arc<FakeFeedStore>,
}

#[async_trait]
impl DynamicFeedManager for FakeDynamicFeedManager {
    async fn add_feed(&self, request: AddFeedRequest) -> Result<ManagedFeedInfo, AppError> {
        let id = format!("added-{}", self.store.feeds.lock().unwrap().len());
        self.store.feeds.lock().unwrap().insert(
            id.clone(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: id.clone(),
                    public_url: request.url.clone(),
                    title: request.title.clone().unwrap_or_else(|| request.url.clone()),
                    fetch_error: None,
                    circuit_breaker_open: false,
                    document: FeedDocument::default(),
                },
                items: vec![],
            },
        );
        Ok(ManagedFeedInfo {
            id,
            url: request.url,
            title: request.title,
            category: request.category,
            description: request.description,
            paused: false,
            last_refreshed: Some(Utc::now()),
        })
    }

    async fn remove_feed(&self, id: &str) -> Result<RemovedFeedInfo, AppError> {
        let removed = self.store.feeds.lock().unwrap().remove(id).ok_or_else(|| {
            AppError::new(ErrorKind::ResourceNotFound, "remove_feed", "feed_store", format!("feed {id} not found")).with_key(id)
        })?;
        Ok(RemovedFeedInfo {
            id: id.to_string(),
            url: removed.feed.public_url,
        })
    }

    async fn remove_feed_by_url(&self, url: &str) -> Result<RemovedFeedInfo, AppError> {
        let id = self
            .store
            .feeds
            .lock()
            .unwrap()
            .iter()
            .find(|(_, f)| f.feed.public_url == url)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "remove_feed_by_url", "feed_store", format!("no feed with url {url}")).with_key(url))?;
        self.store.feeds.lock().unwrap().remove(&id);
        Ok(RemovedFeedInfo { id, url: url.to_string() })
    }

    async fn list_managed_feeds(&self) -> Result<Vec<ManagedFeedInfo>, AppError> {
        Ok(self
            .store
            .feeds
            .lock()
            .unwrap()
            .iter()
            .map(|(id, f)| ManagedFeedInfo {
                id: id.clone(),
                url: f.feed.public_url.clone(),
                title: Some(f.feed.title.clone()),
                category: None,
                description: None,
                paused: false,
                last_refreshed: None,
            })
            .collect())
    }

    async fn refresh_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        let feeds = self.store.feeds.lock().unwrap();
        let f = feeds
            .get(id)
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "refresh_feed", "feed_store", format!("feed {id} not found")).with_key(id))?;
        Ok(ManagedFeedInfo {
            id: id.to_string(),
            url: f.feed.public_url.clone(),
            title: Some(f.feed.title.clone()),
            category: None,
            description: None,
            paused: false,
            last_refreshed: Some(Utc::now()),
        })
    }

    async fn update_feed_metadata(&self, request: UpdateFeedMetadataRequest) -> Result<ManagedFeedInfo, AppError> {
        let mut feeds = self.store.feeds.lock().unwrap();
        let f = feeds.get_mut(&request.id).ok_or_else(|| {
            AppError::new(ErrorKind::ResourceNotFound, "update_feed_metadata", "feed_store", format!("feed {} not found", request.id)).with_key(&request.id)
        })?;
        if let Some(title) = request.title {
            f.feed.title = title;
        }
        Ok(ManagedFeedInfo {
            id: request.id,
            url: f.feed.public_url.clone(),
            title: Some(f.feed.title.clone()),
            category: request.category,
            description: request.description,
            paused: false,
            last_refreshed: None,
        })
    }

    async fn pause_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        self.refresh_feed(id).await
    }

    async fn resume_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        self.refresh_feed(id).await
    }
}

struct FakeImageStore;

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn fetch(&self, _url: &str) -> Result<FetchedImage, AppError> {
        Ok(FetchedImage {
            bytes: vec![1, 2, 3, 4],
            mime_type: "image/png".to_string(),
        })
    }
}

fn build_manager(store: Arc<FakeFeedStore>) -> ResourceManager {
    ResourceManager::new(store, Arc::new(FakeImageStore), Arc::new(ResourceCache::new(CacheConfig::default())))
}

#[tokio::test]
async fn listing_resources_covers_every_feed_three_times_plus_all() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = build_manager(store);

    let resources = manager.list_resources().await.unwrap();
    // feeds://all + (full, items, meta) for each of 2 feeds
    assert_eq!(resources.len(), 1 + 2 * 3);
}

#[tokio::test]
async fn subscribe_then_invalidate_surfaces_in_change_detection() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = Arc::new(build_manager(store));

    let session = manager.create_session().await;
    manager.subscribe(&session, "feeds://feed/alpha").await.unwrap();
    manager.read("feeds://feed/alpha").await.unwrap();

    manager.on_cache_invalidated("feeds://feed/alpha").await;
    let changed = manager.detect_resource_changes().await;
    assert!(changed.contains(&"feeds://feed/alpha".to_string()));
}

#[tokio::test]
async fn unsubscribed_invalidation_never_queues_a_notification() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = build_manager(store);

    manager.on_cache_invalidated("feeds://feed/alpha").await;
    assert!(manager.drain_pending_notifications().is_empty());
}

#[tokio::test]
async fn filtered_items_read_respects_limit_and_offset() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = build_manager(store);

    let contents = manager.read("feeds://feed/alpha/items?limit=1&offset=0").await.unwrap();
    assert!(contents.text.contains("Alpha item one"));
}

#[tokio::test]
async fn dynamic_feed_manager_update_then_invalidate_refreshes_the_feeds_own_identifiers() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = Arc::new(build_manager(store.clone()));
    let dynamic = FakeDynamicFeedManager { store: store.clone() };

    let before = manager.read("feeds://feed/alpha/meta").await.unwrap();
    assert!(before.text.contains("Alpha Feed"));

    dynamic
        .update_feed_metadata(UpdateFeedMetadataRequest {
            id: "alpha".to_string(),
            title: Some("Alpha Feed Renamed".to_string()),
            category: None,
            description: None,
        })
        .await
        .unwrap();
    manager.invalidate_feed("alpha").await;

    let after = manager.read("feeds://feed/alpha/meta").await.unwrap();
    assert!(after.text.contains("Alpha Feed Renamed"));
}

#[tokio::test]
async fn real_cache_delete_drives_pending_notifications_through_the_wired_hook() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let cache = Arc::new(ResourceCache::new(CacheConfig::default()));
    let manager = Arc::new(ResourceManager::new(store, Arc::new(FakeImageStore), cache.clone()));

    // Mirrors the hook wiring performed at server construction: install the
    // resource manager's invalidation callback on the real cache rather than
    // calling `on_cache_invalidated` directly.
    let hooked = manager.clone();
    cache.register_hook(Arc::new(move |identifier: &str| {
        let hooked = hooked.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move {
            hooked.on_cache_invalidated(&identifier).await;
        });
    }));

    let session = manager.create_session().await;
    manager.subscribe(&session, "feeds://feed/alpha").await.unwrap();
    manager.read("feeds://feed/alpha").await.unwrap();

    cache.delete("feeds://feed/alpha").await;

    for _ in 0..50 {
        if !manager.drain_pending_notifications().is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("expected cache.delete() to drive a pending notification through the wired hook");
}

#[tokio::test]
async fn reading_an_unknown_feed_id_is_resource_not_found() {
    let store = Arc::new(FakeFeedStore::with_two_feeds());
    let manager = build_manager(store);

    let err = manager.read("feeds://feed/does-not-exist").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResourceNotFound);
}
