use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A hyperlink associated with a feed: the feed's own page, an alternate
/// rendering, a self link, etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// An author or contributor name. Feeds rarely carry more than a display
/// name by the time they reach this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A feed or item image: either the channel artwork or an item's inline
/// picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// A media attachment on an item (podcast audio, a linked picture, a PDF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

impl Enclosure {
    /// An enclosure is image-typed either by an explicit `image/*` MIME type
    /// or, failing that, by a recognised image file extension on its URL.
    pub fn is_image(&self) -> bool {
        if let Some(mime) = &self.mime_type {
            if mime.starts_with("image/") {
                return true;
            }
        }
        crate::mime::guess_is_image(&self.url)
    }
}

/// Channel-level metadata carried by a syndication feed, independent of its
/// items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// The stable, identifier-bearing description of one tracked feed.
///
/// `id` is derived once (see [`crate::id::derive_feed_id`]) from `public_url`
/// and never recomputed from mutable state; the Resource Layer treats it as
/// the feed's primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub id: String,
    pub public_url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    pub circuit_breaker_open: bool,
    #[serde(flatten)]
    pub document: FeedDocument,
}

impl FeedDescriptor {
    pub fn has_error(&self) -> bool {
        self.fetch_error.is_some()
    }
}

/// One post or article within a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<Person>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub enclosures: Vec<Enclosure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
}

impl Item {
    /// Comma-split values of the custom `tags` field, used by the filter
    /// engine's category predicate as a fallback to the structured
    /// `categories` list.
    pub fn custom_tags(&self) -> Vec<String> {
        self.custom_fields
            .get("tags")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn primary_author(&self) -> Option<&str> {
        self.authors.first().map(|p| p.name.as_str())
    }
}

/// A feed descriptor plus its (possibly filtered) ordered item sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedAndItems {
    pub feed: FeedDescriptor,
    pub items: Vec<Item>,
}

/// One entry of the `feeds://all` list payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedListEntry {
    pub id: String,
    pub title: String,
    pub public_url: String,
    pub has_error: bool,
    pub circuit_breaker_open: bool,
}

impl From<&FeedDescriptor> for FeedListEntry {
    fn from(d: &FeedDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            title: d.title.clone(),
            public_url: d.public_url.clone(),
            has_error: d.has_error(),
            circuit_breaker_open: d.circuit_breaker_open,
        }
    }
}

/// The `feeds://all` resource payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedListPayload {
    pub feeds: Vec<FeedListEntry>,
    pub count: usize,
    pub updated_at: DateTime<Utc>,
}

impl FeedListPayload {
    pub fn new(descriptors: &[FeedDescriptor]) -> Self {
        let feeds: Vec<FeedListEntry> = descriptors.iter().map(FeedListEntry::from).collect();
        Self {
            count: feeds.len(),
            feeds,
            updated_at: Utc::now(),
        }
    }
}

/// Flat projection of a descriptor's metadata fields, returned by
/// `feeds://feed/{id}/meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMetaPayload {
    pub id: String,
    pub public_url: String,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    pub circuit_breaker_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    pub categories: Vec<String>,
    pub links: Vec<Link>,
    pub authors: Vec<Person>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FeedDescriptor> for FeedMetaPayload {
    fn from(d: &FeedDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            public_url: d.public_url.clone(),
            has_error: d.has_error(),
            fetch_error: d.fetch_error.clone(),
            circuit_breaker_open: d.circuit_breaker_open,
            description: d.document.description.clone(),
            link: d.document.link.clone(),
            feed_link: d.document.feed_link.clone(),
            language: d.document.language.clone(),
            copyright: d.document.copyright.clone(),
            updated: d.document.updated,
            published: d.document.published,
            dialect: d.document.dialect.clone(),
            version: d.document.version.clone(),
            generator: d.document.generator.clone(),
            categories: d.document.categories.clone(),
            links: d.document.links.clone(),
            authors: d.document.authors.clone(),
            image: d.document.image.clone(),
            updated_at: Utc::now(),
        }
    }
}
