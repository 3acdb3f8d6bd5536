use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::FeedAndItems;

/// Read-only view over the aggregated feed corpus. Implemented externally
/// (the persistent feed store is out of scope here); the Resource Manager
/// only ever talks to the trait object.
///
/// When `get_feed_and_items` is called with an id the store doesn't
/// recognise, the returned error's message must contain the substring
/// `not found` (case-insensitive) so the Resource Manager can tell a
/// missing feed apart from a backend failure.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn list_all_feeds(&self) -> Result<Vec<crate::model::FeedDescriptor>, AppError>;
    async fn get_feed_and_items(&self, id: &str) -> Result<FeedAndItems, AppError>;
}

/// Bytes and sniffed MIME type for one fetched image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The image-fetching capability consumed by the resource manager when
/// building an items payload with `embedImages=true`. The concrete
/// implementation owns the in-process byte cache and the per-host circuit
/// breaker; callers only see success or a typed failure.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFeedRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFeedMetadataRequest {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedFeedInfo {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedFeedInfo {
    pub id: String,
    pub url: String,
}

/// Runtime add/remove/refresh/pause/resume surface for the feed corpus.
/// Implemented externally; the Resource Layer treats it as a stable handle
/// and invalidates the affected feed's three identifiers after a successful
/// mutation (see the resource manager).
#[async_trait]
pub trait DynamicFeedManager: Send + Sync {
    async fn add_feed(&self, request: AddFeedRequest) -> Result<ManagedFeedInfo, AppError>;
    async fn remove_feed(&self, id: &str) -> Result<RemovedFeedInfo, AppError>;
    async fn remove_feed_by_url(&self, url: &str) -> Result<RemovedFeedInfo, AppError>;
    async fn list_managed_feeds(&self) -> Result<Vec<ManagedFeedInfo>, AppError>;
    async fn refresh_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError>;
    async fn update_feed_metadata(&self, request: UpdateFeedMetadataRequest) -> Result<ManagedFeedInfo, AppError>;
    async fn pause_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError>;
    async fn resume_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError>;
}

/// A session's handle back to its connected peer, used to deliver a real
/// `ResourceUpdated` push when a subscribed identifier changes.
///
/// Kept as a capability trait here, implemented against the concrete
/// transport peer type in the protocol surface, so `core` never depends on
/// the transport crate: the same seam as [`FeedStore`]/[`ImageStore`].
#[async_trait]
pub trait ResourceNotifier: Send + Sync {
    async fn notify_resource_updated(&self, uri: &str) -> Result<(), AppError>;
}
