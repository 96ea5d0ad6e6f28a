//! Amazon specific site adapter

use scraper::{Html, Selector};

use super::{element_text, first_attr, first_text};
use crate::models::ProductInfo;
use crate::traits::{SiteAdapter, SiteConfig, SiteSelectors};

/// Site adapter for Amazon product pages
pub struct AmazonAdapter {
    config: SiteConfig,
}

impl AmazonAdapter {
    pub fn new() -> Self {
        let config = SiteConfig {
            name: "Amazon".to_string(),
            host_pattern: "amazon".to_string(),
            selectors: SiteSelectors {
                purchase_controls: vec![
                    "#add-to-cart-button".to_string(),
                    r#".a-button-input[name="submit.add-to-cart"]"#.to_string(),
                    "#buy-now-button".to_string(),
                    "#sc-buy-box-ptc-button".to_string(),
                    "#submitOrderButtonId".to_string(),
                ],
                title: vec!["#productTitle".to_string()],
                price: vec![
                    ".a-price .a-offscreen".to_string(),
                    "#price_inside_buybox".to_string(),
                    "#priceblock_ourprice".to_string(),
                ],
                category: Some("#wayfinding-breadcrumbs_feature_div li".to_string()),
                image: vec!["#landingImage".to_string(), "#imgBlkFront".to_string()],
            },
        };

        Self { config }
    }
}

impl Default for AmazonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteAdapter for AmazonAdapter {
    fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn extract_product_info(&self, document: &Html, page_url: &str) -> ProductInfo {
        let selectors = &self.config.selectors;

        let category = selectors
            .category
            .as_deref()
            .and_then(|raw| Selector::parse(raw).ok())
            .and_then(|breadcrumb| {
                document
                    .select(&breadcrumb)
                    .map(|el| element_text(&el))
                    .find(|text| !text.is_empty())
            });

        ProductInfo {
            title: first_text(document, &selectors.title).unwrap_or_default(),
            price: first_text(document, &selectors.price).unwrap_or_default(),
            category,
            image_url: first_attr(document, &selectors.image, &["src", "data-old-hires"]),
            url: page_url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r#"
        <html><body>
          <div id="wayfinding-breadcrumbs_feature_div"><ul>
            <li> Clothing, Shoes &amp; Jewelry </li><li>Men</li>
          </ul></div>
          <span id="productTitle">
             Trail Running Shoe
          </span>
          <span class="a-price"><span class="a-offscreen">$89.99</span></span>
          <img id="landingImage" src="https://m.media-amazon.com/images/shoe.jpg">
          <input id="add-to-cart-button" type="submit" name="submit.add-to-cart" value="Add to Cart">
        </body></html>
    "#;

    #[test]
    fn extracts_product_details() {
        let document = Html::parse_document(PRODUCT_PAGE);
        let info = AmazonAdapter::new()
            .extract_product_info(&document, "https://www.amazon.com/dp/B0001?th=1");

        assert_eq!(info.title, "Trail Running Shoe");
        assert_eq!(info.price, "$89.99");
        assert_eq!(info.category.as_deref(), Some("Clothing, Shoes & Jewelry"));
        assert_eq!(
            info.image_url.as_deref(),
            Some("https://m.media-amazon.com/images/shoe.jpg")
        );
        assert_eq!(info.url, "https://www.amazon.com/dp/B0001?th=1");
    }

    #[test]
    fn missing_fields_stay_empty() {
        let document = Html::parse_document("<html><body><p>Dogs of Amazon</p></body></html>");
        let info = AmazonAdapter::new().extract_product_info(&document, "https://www.amazon.com/");

        assert!(info.title.is_empty());
        assert!(info.price.is_empty());
        assert_eq!(info.category, None);
        assert_eq!(info.image_url, None);
    }
}
