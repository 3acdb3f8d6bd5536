use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::Item;
use crate::uri;

pub const MAX_LIMIT: u64 = 1000;

/// Parsed and validated query parameters for an identifier that carries
/// items. `since`/`until` are RFC3339 (a bare date is not accepted), `limit`
/// is silently capped rather than rejected, and `offset` defaults to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterParams {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub category: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
}

/// Serialisable record of the filters actually applied, attached to item
/// payload envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub original_count: usize,
    pub filtered_count: usize,
}

/// Parses filter parameters out of an identifier's query string.
///
/// `identifier` is the full resource identifier (query included); the
/// caller is expected to have already matched it against the identifier
/// grammar.
pub fn parse(identifier: &str) -> Result<FilterParams, AppError> {
    let raw = uri::query_string(identifier).unwrap_or_default();
    let mut params = FilterParams::default();

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let value = percent_decode(value);
        match key {
            "since" => {
                params.since = Some(parse_rfc3339(identifier, "since", &value)?);
            }
            "until" => {
                params.until = Some(parse_rfc3339(identifier, "until", &value)?);
            }
            "limit" => {
                let parsed: i64 = value.parse().map_err(|_| {
                    AppError::validation(
                        "filter_engine::parse",
                        "filter_engine",
                        "limit",
                        format!("limit must be a non-negative integer, got {value:?}"),
                    )
                    .with_key(identifier)
                })?;
                if parsed < 0 {
                    return Err(AppError::validation(
                        "filter_engine::parse",
                        "filter_engine",
                        "limit",
                        "limit must be non-negative",
                    )
                    .with_key(identifier));
                }
                params.limit = Some((parsed as u64).min(MAX_LIMIT));
            }
            "offset" => {
                let parsed: i64 = value.parse().map_err(|_| {
                    AppError::validation(
                        "filter_engine::parse",
                        "filter_engine",
                        "offset",
                        format!("offset must be a non-negative integer, got {value:?}"),
                    )
                    .with_key(identifier)
                })?;
                if parsed < 0 {
                    return Err(AppError::validation(
                        "filter_engine::parse",
                        "filter_engine",
                        "offset",
                        "offset must be non-negative",
                    )
                    .with_key(identifier));
                }
                params.offset = parsed as u64;
            }
            "category" => params.category = Some(value),
            "author" => params.author = Some(value),
            "search" => params.search = Some(value),
            _ => {}
        }
    }

    if let (Some(since), Some(until)) = (params.since, params.until) {
        if since > until {
            return Err(AppError::validation(
                "filter_engine::parse",
                "filter_engine",
                "since",
                "since must not be after until",
            )
            .with_key(identifier));
        }
    }

    Ok(params)
}

fn parse_rfc3339(identifier: &str, field: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::validation(
                "filter_engine::parse",
                "filter_engine",
                field,
                format!("{field} must be an RFC3339 timestamp with a time component, got {value:?}"),
            )
            .with_key(identifier)
        })
}

fn percent_decode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
                out.push('%');
            }
            other => out.push(other),
        }
    }
    out
}

/// Applies a [`FilterParams`] to an item sequence: date/category/author/
/// search predicates first, then offset and limit. Items with no parsed
/// publish time vacuously satisfy the date predicates.
pub fn apply(items: &[Item], params: &FilterParams) -> Vec<Item> {
    let predicated: Vec<&Item> = items.iter().filter(|item| matches_predicates(item, params)).collect();

    let start = (params.offset as usize).min(predicated.len());
    let mut page = predicated[start..].to_vec();
    if let Some(limit) = params.limit {
        page.truncate(limit as usize);
    }
    page.into_iter().cloned().collect()
}

fn matches_predicates(item: &Item, params: &FilterParams) -> bool {
    if let Some(since) = params.since {
        if let Some(published) = item.published {
            if published < since {
                return false;
            }
        }
    }
    if let Some(until) = params.until {
        if let Some(published) = item.published {
            if published > until {
                return false;
            }
        }
    }
    if let Some(category) = &params.category {
        let category = category.to_ascii_lowercase();
        let matches_structured = item.categories.iter().any(|c| c.eq_ignore_ascii_case(&category));
        let matches_tags = item.custom_tags().iter().any(|c| c.eq_ignore_ascii_case(&category));
        if !matches_structured && !matches_tags {
            return false;
        }
    }
    if let Some(author) = &params.author {
        let primary_matches = item.primary_author().is_some_and(|a| a.eq_ignore_ascii_case(author));
        let any_matches = item.authors.iter().any(|p| p.name.eq_ignore_ascii_case(author));
        if !primary_matches && !any_matches {
            return false;
        }
    }
    if let Some(search) = &params.search {
        let search = search.to_ascii_lowercase();
        let haystacks = [item.title.as_str(), item.description.as_deref().unwrap_or(""), item.content.as_deref().unwrap_or("")];
        if !haystacks.iter().any(|h| h.to_ascii_lowercase().contains(&search)) {
            return false;
        }
    }
    true
}

pub fn summary(original_count: usize, filtered_count: usize, params: &FilterParams) -> FilterSummary {
    FilterSummary {
        since: params.since,
        until: params.until,
        limit: params.limit,
        offset: params.offset,
        category: params.category.clone(),
        author: params.author.clone(),
        search: params.search.clone(),
        original_count,
        filtered_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, published: Option<&str>) -> Item {
        Item {
            title: title.to_string(),
            published: published.map(|p| DateTime::parse_from_rfc3339(p).unwrap().with_timezone(&Utc)),
            ..Default::default()
        }
    }

    #[test]
    fn caps_limit_silently() {
        let params = parse("feeds://feed/x/items?limit=2000").unwrap();
        assert_eq!(params.limit, Some(MAX_LIMIT));
    }

    #[test]
    fn rejects_since_after_until() {
        let err = parse("feeds://feed/x/items?since=2023-06-02T00:00:00Z&until=2023-06-01T00:00:00Z").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn rejects_bare_date() {
        assert!(parse("feeds://feed/x/items?since=2023-06-01").is_err());
    }

    #[test]
    fn limit_zero_is_zero_items_not_no_cap() {
        let items = vec![item("a", None), item("b", None)];
        let params = FilterParams {
            limit: Some(0),
            ..Default::default()
        };
        assert!(apply(&items, &params).is_empty());
    }

    #[test]
    fn offset_past_end_is_empty() {
        let items = vec![item("a", None)];
        let params = FilterParams {
            offset: 5,
            ..Default::default()
        };
        assert!(apply(&items, &params).is_empty());
    }

    #[test]
    fn date_window_selects_expected_items() {
        let items = vec![
            item("d1", Some("2023-06-01T00:00:00Z")),
            item("d2", Some("2023-06-02T00:00:00Z")),
            item("d3", Some("2023-06-03T00:00:00Z")),
            item("d4", Some("2023-06-04T00:00:00Z")),
        ];
        let since = parse("feeds://feed/x/items?since=2023-06-02T01:00:00Z").unwrap();
        let result = apply(&items, &since);
        assert_eq!(result.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), vec!["d3", "d4"]);

        let until = parse("feeds://feed/x/items?until=2023-06-02T01:00:00Z").unwrap();
        let result = apply(&items, &until);
        assert_eq!(result.iter().map(|i| i.title.as_str()).collect::<Vec<_>>(), vec!["d1", "d2"]);
    }

    #[test]
    fn is_idempotent() {
        let items = vec![item("a", None), item("b", None), item("c", None)];
        let params = FilterParams {
            limit: Some(2),
            ..Default::default()
        };
        let once = apply(&items, &params);
        let twice = apply(&once, &params);
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_published_passes_date_filters() {
        let items = vec![item("undated", None)];
        let since = FilterParams {
            since: Some(Utc::now()),
            ..Default::default()
        };
        assert_eq!(apply(&items, &since).len(), 1);
    }
}
