use url::Url;

use crate::error::AppError;

pub const SCHEME: &str = "feeds";

/// The four supported resource identifier shapes, per the identifier
/// grammar. Each template is compiled once into a matcher here rather than
/// through a general-purpose pattern engine: there is exactly one
/// placeholder per template, always bound to a single non-empty path
/// segment, and the query string is never part of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    All,
    FeedFull(String),
    FeedItems(String),
    FeedMeta(String),
}

impl ResourceKind {
    /// Canonical identifier for this kind, with no query string.
    pub fn expand(&self) -> String {
        match self {
            ResourceKind::All => format!("{SCHEME}://all"),
            ResourceKind::FeedFull(id) => format!("{SCHEME}://feed/{id}"),
            ResourceKind::FeedItems(id) => format!("{SCHEME}://feed/{id}/items"),
            ResourceKind::FeedMeta(id) => format!("{SCHEME}://feed/{id}/meta"),
        }
    }

    pub fn feed_id(&self) -> Option<&str> {
        match self {
            ResourceKind::All => None,
            ResourceKind::FeedFull(id) | ResourceKind::FeedItems(id) | ResourceKind::FeedMeta(id) => Some(id),
        }
    }

    /// Whether this identifier carries an item sequence and is therefore
    /// eligible for filter and image-fetch query parameters.
    pub fn carries_items(&self) -> bool {
        matches!(self, ResourceKind::FeedFull(_) | ResourceKind::FeedItems(_))
    }

    /// The three identifiers that must be invalidated together when a feed
    /// changes.
    pub fn triple_for(id: &str) -> [ResourceKind; 3] {
        [
            ResourceKind::FeedFull(id.to_string()),
            ResourceKind::FeedItems(id.to_string()),
            ResourceKind::FeedMeta(id.to_string()),
        ]
    }
}

/// Parses a resource identifier, ignoring its query string, into a
/// [`ResourceKind`]. Any identifier that doesn't match one of the four
/// templates is rejected with `InvalidResourceURI`.
pub fn parse(identifier: &str) -> Result<ResourceKind, AppError> {
    let url = Url::parse(identifier)
        .map_err(|_| AppError::invalid_resource_uri(identifier, "resource_identifier_grammar::parse"))?;

    if url.scheme() != SCHEME {
        return Err(AppError::invalid_resource_uri(identifier, "resource_identifier_grammar::parse"));
    }

    let host = url
        .host_str()
        .ok_or_else(|| AppError::invalid_resource_uri(identifier, "resource_identifier_grammar::parse"))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segs| segs.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    match (host, segments.as_slice()) {
        ("all", []) => Ok(ResourceKind::All),
        ("feed", [id]) => Ok(ResourceKind::FeedFull((*id).to_string())),
        ("feed", [id, tail]) if *tail == "items" => Ok(ResourceKind::FeedItems((*id).to_string())),
        ("feed", [id, tail]) if *tail == "meta" => Ok(ResourceKind::FeedMeta((*id).to_string())),
        _ => Err(AppError::invalid_resource_uri(identifier, "resource_identifier_grammar::parse")),
    }
}

/// Returns the raw query string (if any) following the identifier's path,
/// for hand-off to the filter engine.
pub fn query_string(identifier: &str) -> Option<String> {
    Url::parse(identifier).ok().and_then(|u| u.query().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_all_four_templates() {
        assert_eq!(parse("feeds://all").unwrap(), ResourceKind::All);
        assert_eq!(parse("feeds://feed/abc").unwrap(), ResourceKind::FeedFull("abc".into()));
        assert_eq!(parse("feeds://feed/abc/items").unwrap(), ResourceKind::FeedItems("abc".into()));
        assert_eq!(parse("feeds://feed/abc/meta").unwrap(), ResourceKind::FeedMeta("abc".into()));
    }

    #[test]
    fn ignores_query_string() {
        assert_eq!(
            parse("feeds://feed/abc/items?limit=2").unwrap(),
            ResourceKind::FeedItems("abc".into())
        );
        assert_eq!(query_string("feeds://feed/abc/items?limit=2").as_deref(), Some("limit=2"));
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(parse("feeds://invalid/resource").is_err());
        assert!(parse("feeds://feed/abc/items/extra").is_err());
        assert!(parse("http://example.com").is_err());
        assert!(parse("not a uri").is_err());
    }

    #[test]
    fn round_trips_through_expand_and_parse() {
        let kind = ResourceKind::FeedItems("my-feed".into());
        let expanded = kind.expand();
        assert_eq!(parse(&expanded).unwrap(), kind);
        assert_eq!(parse(&expanded).unwrap().feed_id(), Some("my-feed"));
    }
}
