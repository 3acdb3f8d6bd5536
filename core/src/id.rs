use url::Url;

use crate::fnv;

const MAX_BASE_LEN: usize = 40;

/// Characters the identifier grammar and downstream transports treat as
/// structural; a derived id must never contain them.
const UNSAFE_CHARS: &[char] = &[
    ' ', '/', '?', '#', '[', ']', '@', '!', '$', '&', '\'', '(', ')', '*', '+', ',', ';', '=',
];

/// Derives a stable, URL-safe identifier for a feed from its public URL.
///
/// `id(url)` is a pure function: lowercase host, dash-joined cleaned path
/// segments, truncated to 40 characters. If truncation was required, or the
/// URL failed to parse, an 8-hex-digit FNV-1a digest of the original URL is
/// appended so the result stays unique and stable across runs.
pub fn derive_feed_id(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("feed").to_ascii_lowercase();
            let path = clean_path(parsed.path());
            let base = if path.is_empty() {
                host
            } else {
                format!("{host}-{path}")
            };

            if base.chars().count() <= MAX_BASE_LEN {
                base
            } else {
                let truncated: String = base.chars().take(MAX_BASE_LEN).collect();
                format!("{truncated}-{}", fnv::hex8(url.as_bytes()))
            }
        }
        Err(_) => format!("feed-{}", fnv::hex8(url.as_bytes())),
    }
}

fn clean_path(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(clean_segment)
        .filter(|s| !s.is_empty())
        .collect();
    segments.join("-")
}

fn clean_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let collapsed = collapse_dashes(&cleaned);
    collapsed.trim_matches('-').to_string()
}

fn collapse_dashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for c in s.chars() {
        if c == '-' {
            if !prev_dash {
                out.push(c);
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}

/// `true` if `id` is safe to embed directly in an identifier path segment.
pub fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| UNSAFE_CHARS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_pure_and_stable() {
        let url = "https://example.com/Feeds/Tech-News.xml";
        assert_eq!(derive_feed_id(url), derive_feed_id(url));
    }

    #[test]
    fn lowercases_host_and_cleans_path() {
        let id = derive_feed_id("https://EXAMPLE.com/a/b_c");
        assert_eq!(id, "example.com-a-b-c");
    }

    #[test]
    fn is_bounded_and_safe() {
        let long_path = "a".repeat(100);
        let id = derive_feed_id(&format!("https://example.com/{long_path}"));
        assert!(id.chars().count() <= 50);
        assert!(is_safe_identifier(&id));
        assert!(id.contains('-'));
    }

    #[test]
    fn falls_back_on_parse_failure() {
        let id = derive_feed_id("not a url at all");
        assert!(id.starts_with("feed-"));
        assert!(is_safe_identifier(&id));
    }

    #[test]
    fn appends_digest_only_when_truncated() {
        let short = derive_feed_id("https://example.com/short");
        assert!(!short.contains("--"));
        let short_digest_free = derive_feed_id("https://example.com/short");
        assert_eq!(short, short_digest_free);
    }
}
