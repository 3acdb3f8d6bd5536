use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use feed_mcp_core::error::{AppError, ErrorKind};
use feed_mcp_core::model::{Enclosure, FeedAndItems, FeedDescriptor, FeedDocument, Image, Item, Link, Person};
use feed_mcp_core::traits::{
    AddFeedRequest, DynamicFeedManager, FeedStore, ManagedFeedInfo, RemovedFeedInfo, UpdateFeedMetadataRequest,
};
use feed_mcp_core::id::derive_feed_id;
use tracing::{debug, info, warn};

/// Bookkeeping the feed content descriptor itself doesn't carry: whether a
/// feed is paused, its managed category/description overrides, and when it
/// was last refreshed.
struct ManagedEntry {
    feed_and_items: FeedAndItems,
    category: Option<String>,
    description_override: Option<String>,
    paused: bool,
    last_refreshed: chrono::DateTime<Utc>,
}

/// In-process reference implementation of the feed corpus: fetches and
/// parses feeds over HTTP on demand and keeps the aggregated result in
/// memory. Persisting the corpus durably, and everything about polling
/// schedules and retry/backoff, is the production feed fetcher's job and
/// stays out of this crate; this store exists so the protocol surface has a
/// real `FeedStore`/`DynamicFeedManager` to run against.
pub struct InMemoryFeedStore {
    client: reqwest::Client,
    entries: RwLock<HashMap<String, ManagedEntry>>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("feed-mcp/0.1")
                .build()
                .expect("failed to build feed store http client"),
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<FeedAndItems, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::network("fetch_feed", "feed_store", url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::network("fetch_feed", "feed_store", url, format!("unexpected status {}", response.status()))
                .with_http_status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::network("fetch_feed", "feed_store", url, e.to_string()))?;

        let parsed = feed_rs::parser::parse(body.as_bytes())
            .map_err(|e| AppError::new(ErrorKind::ResourceUnavailable, "fetch_feed", "feed_store", format!("failed to parse feed: {e}")).with_key(url))?;

        let id = derive_feed_id(url);
        let title = parsed.title.as_ref().map(|t| t.content.clone()).unwrap_or_else(|| url.to_string());

        let document = FeedDocument {
            description: parsed.description.as_ref().map(|d| d.content.clone()),
            link: parsed.links.first().map(|l| l.href.clone()),
            feed_link: Some(url.to_string()),
            language: parsed.language.clone(),
            copyright: parsed.rights.as_ref().map(|r| r.content.clone()),
            updated: parsed.updated.map(|t| t.with_timezone(&Utc)),
            published: parsed.published.map(|t| t.with_timezone(&Utc)),
            dialect: Some(format!("{:?}", parsed.feed_type)),
            version: None,
            generator: parsed.generator.as_ref().map(|g| g.content.clone()),
            categories: parsed.categories.iter().map(|c| c.term.clone()).collect(),
            links: parsed.links.iter().map(convert_link).collect(),
            authors: parsed.authors.iter().map(convert_person).collect(),
            image: parsed.logo.as_ref().map(convert_image),
        };

        let feed = FeedDescriptor {
            id: id.clone(),
            public_url: url.to_string(),
            title,
            fetch_error: None,
            circuit_breaker_open: false,
            document,
        };

        let items = parsed.entries.iter().map(convert_entry).collect();

        debug!(feed_id = %id, item_count = items.len(), "fetched and parsed feed");
        Ok(FeedAndItems { feed, items })
    }
}

impl Default for InMemoryFeedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_link(link: &feed_rs::model::Link) -> Link {
    Link {
        href: link.href.clone(),
        rel: link.rel.clone(),
        media_type: link.media_type.clone(),
    }
}

fn convert_person(person: &feed_rs::model::Person) -> Person {
    Person {
        name: person.name.clone(),
        email: person.email.clone(),
    }
}

fn convert_image(image: &feed_rs::model::Image) -> Image {
    Image {
        url: image.uri.clone(),
        title: image.title.clone(),
        width: image.width,
        height: image.height,
    }
}

fn convert_entry(entry: &feed_rs::model::Entry) -> Item {
    let enclosures = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| {
            c.url.as_ref().map(|u| Enclosure {
                url: u.to_string(),
                mime_type: c.content_type.as_ref().map(|m| m.essence_str().to_string()),
                length: c.size,
            })
        })
        .collect();

    let image = entry.media.iter().find_map(|m| m.thumbnails.first()).map(|t| Image {
        url: t.image.uri.clone(),
        title: None,
        width: t.image.width,
        height: t.image.height,
    });

    Item {
        title: entry.title.as_ref().map(|t| t.content.clone()).unwrap_or_else(|| "Untitled".to_string()),
        link: entry.links.first().map(|l| l.href.clone()),
        description: entry.summary.as_ref().map(|s| s.content.clone()),
        content: entry.content.as_ref().and_then(|c| c.body.clone()),
        published: entry.published.map(|t| t.with_timezone(&Utc)),
        authors: entry.authors.iter().map(convert_person).collect(),
        categories: entry.categories.iter().map(|c| c.term.clone()).collect(),
        enclosures,
        image,
        guid: if entry.id.is_empty() { None } else { Some(entry.id.clone()) },
        custom_fields: HashMap::new(),
    }
}

#[async_trait]
impl FeedStore for InMemoryFeedStore {
    async fn list_all_feeds(&self) -> Result<Vec<FeedDescriptor>, AppError> {
        let entries = self.entries.read().expect("feed store lock poisoned");
        Ok(entries.values().map(|e| e.feed_and_items.feed.clone()).collect())
    }

    async fn get_feed_and_items(&self, id: &str) -> Result<FeedAndItems, AppError> {
        let entries = self.entries.read().expect("feed store lock poisoned");
        entries
            .get(id)
            .map(|e| e.feed_and_items.clone())
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "get_feed_and_items", "feed_store", format!("feed {id} not found")).with_key(id))
    }
}

#[async_trait]
impl DynamicFeedManager for InMemoryFeedStore {
    async fn add_feed(&self, request: AddFeedRequest) -> Result<ManagedFeedInfo, AppError> {
        let mut feed_and_items = self.fetch_and_parse(&request.url).await?;
        if let Some(title) = &request.title {
            feed_and_items.feed.title = title.clone();
        }
        let id = feed_and_items.feed.id.clone();

        let info = ManagedFeedInfo {
            id: id.clone(),
            url: request.url,
            title: Some(feed_and_items.feed.title.clone()),
            category: request.category.clone(),
            description: request.description.clone(),
            paused: false,
            last_refreshed: Some(Utc::now()),
        };

        let mut entries = self.entries.write().expect("feed store lock poisoned");
        entries.insert(
            id,
            ManagedEntry {
                feed_and_items,
                category: request.category,
                description_override: request.description,
                paused: false,
                last_refreshed: Utc::now(),
            },
        );
        info!(feed_id = %info.id, "added feed");
        Ok(info)
    }

    async fn remove_feed(&self, id: &str) -> Result<RemovedFeedInfo, AppError> {
        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let removed = entries
            .remove(id)
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "remove_feed", "feed_store", format!("feed {id} not found")).with_key(id))?;
        Ok(RemovedFeedInfo {
            id: id.to_string(),
            url: removed.feed_and_items.feed.public_url,
        })
    }

    async fn remove_feed_by_url(&self, url: &str) -> Result<RemovedFeedInfo, AppError> {
        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let id = entries
            .iter()
            .find(|(_, e)| e.feed_and_items.feed.public_url == url)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "remove_feed_by_url", "feed_store", format!("no feed with url {url}")).with_key(url))?;
        entries.remove(&id);
        Ok(RemovedFeedInfo { id, url: url.to_string() })
    }

    async fn list_managed_feeds(&self) -> Result<Vec<ManagedFeedInfo>, AppError> {
        let entries = self.entries.read().expect("feed store lock poisoned");
        Ok(entries
            .iter()
            .map(|(id, e)| ManagedFeedInfo {
                id: id.clone(),
                url: e.feed_and_items.feed.public_url.clone(),
                title: Some(e.feed_and_items.feed.title.clone()),
                category: e.category.clone(),
                description: e.description_override.clone(),
                paused: e.paused,
                last_refreshed: Some(e.last_refreshed),
            })
            .collect())
    }

    async fn refresh_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        let url = {
            let entries = self.entries.read().expect("feed store lock poisoned");
            entries
                .get(id)
                .map(|e| e.feed_and_items.feed.public_url.clone())
                .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "refresh_feed", "feed_store", format!("feed {id} not found")).with_key(id))?
        };

        let refreshed = match self.fetch_and_parse(&url).await {
            Ok(f) => f,
            Err(err) => {
                warn!(feed_id = id, error = %err, "refresh failed, marking feed with fetch error");
                let mut entries = self.entries.write().expect("feed store lock poisoned");
                if let Some(entry) = entries.get_mut(id) {
                    entry.feed_and_items.feed.fetch_error = Some(err.message.clone());
                }
                return Err(err);
            }
        };

        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "refresh_feed", "feed_store", format!("feed {id} not found")).with_key(id))?;
        entry.feed_and_items = refreshed;
        entry.last_refreshed = Utc::now();

        Ok(ManagedFeedInfo {
            id: id.to_string(),
            url: entry.feed_and_items.feed.public_url.clone(),
            title: Some(entry.feed_and_items.feed.title.clone()),
            category: entry.category.clone(),
            description: entry.description_override.clone(),
            paused: entry.paused,
            last_refreshed: Some(entry.last_refreshed),
        })
    }

    async fn update_feed_metadata(&self, request: UpdateFeedMetadataRequest) -> Result<ManagedFeedInfo, AppError> {
        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let entry = entries.get_mut(&request.id).ok_or_else(|| {
            AppError::new(ErrorKind::ResourceNotFound, "update_feed_metadata", "feed_store", format!("feed {} not found", request.id)).with_key(&request.id)
        })?;

        if let Some(title) = request.title {
            entry.feed_and_items.feed.title = title;
        }
        if let Some(category) = request.category {
            entry.category = Some(category);
        }
        if let Some(description) = request.description {
            entry.description_override = Some(description);
        }

        Ok(ManagedFeedInfo {
            id: request.id.clone(),
            url: entry.feed_and_items.feed.public_url.clone(),
            title: Some(entry.feed_and_items.feed.title.clone()),
            category: entry.category.clone(),
            description: entry.description_override.clone(),
            paused: entry.paused,
            last_refreshed: Some(entry.last_refreshed),
        })
    }

    async fn pause_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "pause_feed", "feed_store", format!("feed {id} not found")).with_key(id))?;
        entry.paused = true;
        Ok(ManagedFeedInfo {
            id: id.to_string(),
            url: entry.feed_and_items.feed.public_url.clone(),
            title: Some(entry.feed_and_items.feed.title.clone()),
            category: entry.category.clone(),
            description: entry.description_override.clone(),
            paused: true,
            last_refreshed: Some(entry.last_refreshed),
        })
    }

    async fn resume_feed(&self, id: &str) -> Result<ManagedFeedInfo, AppError> {
        let mut entries = self.entries.write().expect("feed store lock poisoned");
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| AppError::new(ErrorKind::ResourceNotFound, "resume_feed", "feed_store", format!("feed {id} not found")).with_key(id))?;
        entry.paused = false;
        Ok(ManagedFeedInfo {
            id: id.to_string(),
            url: entry.feed_and_items.feed.public_url.clone(),
            title: Some(entry.feed_and_items.feed.title.clone()),
            category: entry.category.clone(),
            description: entry.description_override.clone(),
            paused: false,
            last_refreshed: Some(entry.last_refreshed),
        })
    }
}
