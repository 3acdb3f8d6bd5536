/// Extension-based fallback used when an enclosure has no (or a non-image)
/// declared MIME type. Only the handful of extensions the image fetcher
/// actually embeds are treated as images; everything else degrades to a
/// plain link.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "ico"];

pub fn guess_is_image(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = match path.rsplit('.').next() {
        Some(ext) if ext.len() < path.len() => ext.to_ascii_lowercase(),
        _ => return false,
    };
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    mime_guess::from_path(path)
        .first()
        .map(|m| m.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_known_extensions() {
        assert!(guess_is_image("https://example.com/a/b.PNG"));
        assert!(guess_is_image("https://example.com/a/b.jpeg?w=400"));
        assert!(!guess_is_image("https://example.com/a/b.mp3"));
        assert!(!guess_is_image("https://example.com/a/b"));
    }
}
