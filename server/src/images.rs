use std::sync::Arc;

use base64::Engine;
use feed_mcp_core::model::Item;
use feed_mcp_core::traits::ImageStore;
use tracing::warn;

use crate::payload::{ImageReference, ImageReferenceMeta};

/// Maximum image references contributed by a single item: the primary
/// image first, then image-typed enclosures, in that order. The source's
/// excess (beyond N) is dropped from the tail, not the head.
pub const MAX_IMAGES_PER_ITEM: usize = 10;

/// Builds the `images` array for an items page. With `embed=false` every
/// reference is a bare link; with `embed=true` each is fetched through
/// `image_store` and embedded as base64, degrading to a link on failure,
/// oversize, or an open circuit breaker.
pub async fn collect_images(items: &[Item], embed: bool, image_store: &Arc<dyn ImageStore>) -> Vec<ImageReference> {
    let mut out = Vec::new();
    for (item_index, item) in items.iter().enumerate() {
        let mut candidates: Vec<(String, Option<String>)> = Vec::new();
        if let Some(image) = &item.image {
            if !image.url.is_empty() {
                candidates.push((image.url.clone(), None));
            }
        }
        for enclosure in item.enclosures.iter().filter(|e| e.is_image()) {
            if !enclosure.url.is_empty() {
                candidates.push((enclosure.url.clone(), enclosure.mime_type.clone()));
            }
        }
        candidates.truncate(MAX_IMAGES_PER_ITEM);

        for (url, declared_mime) in candidates {
            let reference = if embed {
                match image_store.fetch(&url).await {
                    Ok(fetched) => ImageReference {
                        url: url.clone(),
                        mime_type: Some(fetched.mime_type),
                        data_base64: Some(base64::engine::general_purpose::STANDARD.encode(&fetched.bytes)),
                        embedded: true,
                        meta: ImageReferenceMeta { item_index },
                    },
                    Err(err) => {
                        warn!(url, error = %err, "image embed failed, degrading to link");
                        ImageReference {
                            url,
                            mime_type: declared_mime,
                            data_base64: None,
                            embedded: false,
                            meta: ImageReferenceMeta { item_index },
                        }
                    }
                }
            } else {
                ImageReference {
                    url,
                    mime_type: declared_mime,
                    data_base64: None,
                    embedded: false,
                    meta: ImageReferenceMeta { item_index },
                }
            };
            out.push(reference);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use feed_mcp_core::error::AppError;
    use feed_mcp_core::model::{Enclosure, Image};
    use feed_mcp_core::traits::FetchedImage;

    struct AlwaysFails;

    #[async_trait]
    impl ImageStore for AlwaysFails {
        async fn fetch(&self, url: &str) -> Result<FetchedImage, AppError> {
            Err(AppError::network("test", "test", url, "boom"))
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl ImageStore for AlwaysSucceeds {
        async fn fetch(&self, _url: &str) -> Result<FetchedImage, AppError> {
            Ok(FetchedImage {
                bytes: vec![1, 2, 3],
                mime_type: "image/png".to_string(),
            })
        }
    }

    fn item_with_images(n: usize) -> Item {
        let mut item = Item::default();
        item.image = Some(Image {
            url: "https://example.com/a.png".into(),
            title: None,
            width: None,
            height: None,
        });
        for i in 0..n {
            item.enclosures.push(Enclosure {
                url: format!("https://example.com/e{i}.png"),
                mime_type: Some("image/png".into()),
                length: None,
            });
        }
        item
    }

    #[tokio::test]
    async fn caps_at_ten_per_item_keeping_the_head() {
        let item = item_with_images(15);
        let store: Arc<dyn ImageStore> = Arc::new(AlwaysSucceeds);
        let refs = collect_images(&[item], false, &store).await;
        assert_eq!(refs.len(), MAX_IMAGES_PER_ITEM);
        assert_eq!(refs[0].url, "https://example.com/a.png");
    }

    #[tokio::test]
    async fn empty_urls_are_skipped() {
        let mut item = Item::default();
        item.enclosures.push(Enclosure {
            url: String::new(),
            mime_type: Some("image/png".into()),
            length: None,
        });
        let store: Arc<dyn ImageStore> = Arc::new(AlwaysSucceeds);
        let refs = collect_images(&[item], false, &store).await;
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn failed_embed_degrades_to_link() {
        let item = item_with_images(0);
        let store: Arc<dyn ImageStore> = Arc::new(AlwaysFails);
        let refs = collect_images(&[item], true, &store).await;
        assert_eq!(refs.len(), 1);
        assert!(!refs[0].embedded);
        assert!(refs[0].data_base64.is_none());
    }

    #[tokio::test]
    async fn successful_embed_carries_base64_and_item_index() {
        let item = item_with_images(0);
        let store: Arc<dyn ImageStore> = Arc::new(AlwaysSucceeds);
        let refs = collect_images(&[item], true, &store).await;
        assert_eq!(refs.len(), 1);
        assert!(refs[0].embedded);
        assert!(refs[0].data_base64.is_some());
        assert_eq!(refs[0].meta.item_index, 0);
    }
}
