use chrono::{DateTime, Utc};
use feed_mcp_core::filter::FilterSummary;
use feed_mcp_core::model::{FeedAndItems, Item};
use serde::{Deserialize, Serialize};

/// `feeds://feed/{id}/items` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsPayload {
    pub items: Vec<Item>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_info: Option<FilterSummary>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageReference>>,
}

/// `feeds://feed/{id}` payload when filters were applied; the bare
/// `FeedAndItems` is returned unwrapped when none were.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullFeedPayload {
    pub feed_result: FeedAndItems,
    pub filter_info: FilterSummary,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageReference>>,
}

/// One image or enclosure surfaced for an item, either as a bare link or
/// (when `embedImages=true` and the fetch succeeded within the size cap) as
/// base64-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
    pub embedded: bool,
    pub meta: ImageReferenceMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReferenceMeta {
    pub item_index: usize,
}
