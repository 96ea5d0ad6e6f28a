//! Heuristic adapter for sites without a dedicated one

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

use super::{element_text, first_attr, parse_selectors};
use crate::models::ProductInfo;
use crate::traits::{SiteAdapter, SiteConfig, SiteSelectors};

static PRICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?\d+(\.\d{2})?").expect("price pattern is valid"));

/// Fallback adapter: first plausible `h1` as title, first price-looking element as price
pub struct GenericAdapter {
    config: SiteConfig,
}

impl GenericAdapter {
    pub fn new() -> Self {
        let config = SiteConfig {
            name: "Generic".to_string(),
            host_pattern: String::new(),
            selectors: SiteSelectors {
                purchase_controls: Vec::new(),
                title: vec!["h1".to_string()],
                price: vec![
                    ".price".to_string(),
                    ".product-price".to_string(),
                    r#"[itemprop="price"]"#.to_string(),
                ],
                category: None,
                image: vec![r#"meta[property="og:image"]"#.to_string()],
            },
        };

        Self { config }
    }
}

impl Default for GenericAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteAdapter for GenericAdapter {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn extract_product_info(&self, document: &Html, page_url: &str) -> ProductInfo {
        let selectors = &self.config.selectors;

        // Short headings are usually section labels, long ones are marketing copy
        let title = parse_selectors(&selectors.title)
            .iter()
            .flat_map(|selector| document.select(selector))
            .map(|el| element_text(&el))
            .find(|text| (11..200).contains(&text.chars().count()))
            .unwrap_or_default();

        let price = parse_selectors(&selectors.price)
            .iter()
            .flat_map(|selector| document.select(selector))
            .map(|el| element_text(&el))
            .find(|text| PRICE_PATTERN.is_match(text))
            .unwrap_or_default();

        ProductInfo {
            title,
            price,
            category: None,
            image_url: first_attr(document, &selectors.image, &["content"]),
            url: page_url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_plausible_heading_and_price() {
        let document = Html::parse_document(
            r#"<html><head><meta property="og:image" content="https://shop.example/boot.jpg"></head>
               <body>
                 <h1>Sale</h1>
                 <h1>Waxed Canvas Field Boot</h1>
                 <span class="price">Call us</span>
                 <div class="product-price">$149.00</div>
               </body></html>"#,
        );
        let info = GenericAdapter::new().extract_product_info(&document, "https://shop.example/p/boot");

        assert_eq!(info.title, "Waxed Canvas Field Boot");
        assert_eq!(info.price, "$149.00");
        assert_eq!(info.image_url.as_deref(), Some("https://shop.example/boot.jpg"));
    }

    #[test]
    fn empty_page_yields_empty_info() {
        let document = Html::parse_document("<html><body><h1>Hi</h1></body></html>");
        let info = GenericAdapter::new().extract_product_info(&document, "https://shop.example/");

        assert!(info.title.is_empty());
        assert!(info.price.is_empty());
        assert_eq!(info.display_title(), "this item");
    }
}
