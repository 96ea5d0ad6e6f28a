//! Site adapters and the helpers they share for reading product pages

mod amazon;
mod generic;

pub use amazon::AmazonAdapter;
pub use generic::GenericAdapter;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::traits::SiteAdapter;

/// Picks the adapter for a page by host, falling back to generic heuristics
pub struct SiteRegistry {
    adapters: Vec<Box<dyn SiteAdapter>>,
    fallback: GenericAdapter,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(AmazonAdapter::new())],
            fallback: GenericAdapter::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Box<dyn SiteAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn for_url(&self, page_url: &str) -> &dyn SiteAdapter {
        let host = host_of(page_url);
        if host.is_empty() {
            return &self.fallback;
        }

        match self.adapters.iter().find(|adapter| adapter.matches_host(&host)) {
            Some(adapter) => adapter.as_ref(),
            None => &self.fallback,
        }
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Host part of a URL, lowercased; empty when the URL has none
pub fn host_of(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .unwrap_or_default()
}

/// Resolve `href` against the page URL; `None` for script/fragment-only links
pub fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_lowercase().starts_with("javascript:")
    {
        return None;
    }

    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }

    Url::parse(page_url)
        .ok()
        .and_then(|base| base.join(href).ok())
        .map(|url| url.to_string())
}

/// The URL a product page declares as canonical, else the page URL itself
pub fn canonical_url(document: &Html, page_url: &str) -> String {
    let Ok(selector) = Selector::parse(r#"link[rel="canonical"]"#) else {
        return page_url.to_string();
    };

    document
        .select(&selector)
        .filter_map(|link| link.value().attr("href"))
        .find_map(|href| resolve_href(page_url, href))
        .unwrap_or_else(|| page_url.to_string())
}

/// Whitespace-collapsed text content of an element
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse each selector, skipping (and logging) the ones that do not parse
pub(crate) fn parse_selectors(selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|raw| match Selector::parse(raw) {
            Ok(selector) => Some(selector),
            Err(e) => {
                debug!("Skipping unparsable selector {}: {:?}", raw, e);
                None
            }
        })
        .collect()
}

/// Text of the first non-empty match, trying selectors in order
pub(crate) fn first_text(document: &Html, selectors: &[String]) -> Option<String> {
    parse_selectors(selectors).iter().find_map(|selector| {
        document
            .select(selector)
            .map(|el| element_text(&el))
            .find(|text| !text.is_empty())
    })
}

/// First present attribute among `attrs` on the first match, trying selectors in order
pub(crate) fn first_attr(document: &Html, selectors: &[String], attrs: &[&str]) -> Option<String> {
    parse_selectors(selectors).iter().find_map(|selector| {
        document.select(selector).find_map(|el| {
            attrs
                .iter()
                .find_map(|attr| el.value().attr(attr))
                .map(str::to_string)
        })
    })
}
