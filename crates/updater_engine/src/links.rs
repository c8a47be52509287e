use scraper::{Html, Selector};
use url::Url;

const DEFAULT_MAX_LINKS: usize = 5_000;

/// Collects every `href` on a page, in document order, resolved against the page URL.
///
/// Parsing goes through an HTML5 tree builder, so truncated or malformed
/// markup still yields whatever links it contains.
pub struct LinkScanner {
    max_links: usize,
}

impl LinkScanner {
    pub fn new() -> Self {
        Self::with_max_links(DEFAULT_MAX_LINKS)
    }

    pub fn with_max_links(max_links: usize) -> Self {
        Self { max_links }
    }

    pub fn scan(&self, html: &str, base_url: Option<&str>) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("[href]") else {
            return Vec::new();
        };
        let base_url = base_url.and_then(|b| Url::parse(b).ok());

        document
            .select(&selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| resolve_url(href, base_url.as_ref()))
            .take(self.max_links)
            .collect()
    }
}

impl Default for LinkScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_url(reference: &str, base: Option<&Url>) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with('#') || lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url.into());
    }
    match base {
        Some(base) => base.join(trimmed).ok().map(Into::into),
        None => Some(trimmed.to_string()),
    }
}
