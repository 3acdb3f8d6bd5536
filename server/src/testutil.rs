//! Fakes used by unit tests in this crate. Not compiled outside `cfg(test)`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use feed_mcp_core::error::{AppError, ErrorKind};
use feed_mcp_core::model::{FeedAndItems, FeedDescriptor, FeedDocument, Item};
use feed_mcp_core::traits::FeedStore;

/// An in-memory `FeedStore` over a fixed snapshot, for tests that need
/// deterministic, network-free feed data.
pub struct FakeFeedStore {
    feeds: HashMap<String, FeedAndItems>,
}

impl FakeFeedStore {
    pub fn empty() -> Self {
        Self { feeds: HashMap::new() }
    }

    pub fn with_sample_feeds() -> Self {
        let now = Utc::now();
        let mut feeds = HashMap::new();

        feeds.insert(
            "tech-blog".to_string(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: "tech-blog".to_string(),
                    public_url: "https://example.com/tech.xml".to_string(),
                    title: "Example Tech Blog".to_string(),
                    fetch_error: None,
                    circuit_breaker_open: false,
                    document: FeedDocument::default(),
                },
                items: vec![
                    item("Rust 2.0 Announced", Some(now - Duration::hours(2)), vec!["rust".to_string(), "release".to_string()]),
                    item("WASM in Production", Some(now - Duration::hours(30)), vec!["wasm".to_string()]),
                ],
            },
        );

        feeds.insert(
            "science-daily".to_string(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: "science-daily".to_string(),
                    public_url: "https://example.com/science.xml".to_string(),
                    title: "Science Daily".to_string(),
                    fetch_error: None,
                    circuit_breaker_open: false,
                    document: FeedDocument::default(),
                },
                items: vec![item(
                    "New Exoplanet Discovered",
                    Some(now - Duration::hours(5)),
                    vec!["space".to_string(), "astronomy".to_string()],
                )],
            },
        );

        Self { feeds }
    }

    /// A store with one feed whose `get_feed_and_items` always fails, used
    /// to exercise the "degraded"/"broken" report branches.
    pub fn with_broken_feed() -> Self {
        let mut feeds = HashMap::new();
        feeds.insert(
            "broken-feed".to_string(),
            FeedAndItems {
                feed: FeedDescriptor {
                    id: "broken-feed".to_string(),
                    public_url: "https://example.com/broken.xml".to_string(),
                    title: "Broken Feed".to_string(),
                    fetch_error: Some("connection reset".to_string()),
                    circuit_breaker_open: true,
                    document: FeedDocument::default(),
                },
                items: vec![],
            },
        );
        Self { feeds }
    }
}

fn item(title: &str, published: Option<chrono::DateTime<Utc>>, categories: Vec<String>) -> Item {
    Item {
        title: title.to_string(),
        published,
        categories,
        ..Default::default()
    }
}

#[async_trait]
impl FeedStore for FakeFeedStore {
    async fn list_all_feeds(&self) -> Result<Vec<FeedDescriptor>, AppError> {
        Ok(self.feeds.values().map(|f| f.feed.clone()).collect())
    }

    async fn get_feed_and_items(&self, id: &str) -> Result<FeedAndItems, AppError> {
        self.feeds
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "get_feed_and_items", "feed_store", format!("feed {id} not found")).with_key(id))
    }
}

/// An `ImageStore` that always succeeds with a one-byte PNG-ish payload, for
/// tests exercising the `embedImages` path without real network access.
pub struct FakeImageStore {
    pub mime_type: String,
}

impl FakeImageStore {
    pub fn always_succeeds() -> Self {
        Self { mime_type: "image/png".to_string() }
    }
}

#[async_trait]
impl feed_mcp_core::traits::ImageStore for FakeImageStore {
    async fn fetch(&self, _url: &str) -> Result<feed_mcp_core::traits::FetchedImage, AppError> {
        Ok(feed_mcp_core::traits::FetchedImage {
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            mime_type: self.mime_type.clone(),
        })
    }
}

/// An `ImageStore` that always fails, for tests exercising link-degradation.
pub struct FakeImageStoreAlwaysFails;

#[async_trait]
impl feed_mcp_core::traits::ImageStore for FakeImageStoreAlwaysFails {
    async fn fetch(&self, url: &str) -> Result<feed_mcp_core::traits::FetchedImage, AppError> {
        Err(AppError::network("fetch", "fake_image_store", url, "simulated failure"))
    }
}
