//! Second-hand marketplace search links offered in the alternatives view

use serde::Serialize;

use crate::models::ProductInfo;

/// Used listings usually go for this share of the new price
pub const SECOND_HAND_PRICE_BAND: (f64, f64) = (0.5, 0.7);

/// A marketplace searched for second-hand copies
#[derive(Debug, Clone)]
pub struct Marketplace {
    pub name: String,
    /// Search URL pattern with {query} placeholder
    pub search_url_pattern: String,
}

/// A search link plus the price range to expect there
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alternative {
    pub marketplace: String,
    pub search_url: String,
    pub price_low: Option<f64>,
    pub price_high: Option<f64>,
}

pub struct MarketplaceLinks {
    marketplaces: Vec<Marketplace>,
}

impl MarketplaceLinks {
    pub fn new() -> Self {
        let marketplaces = vec![
            Marketplace {
                name: "eBay".to_string(),
                search_url_pattern: "https://www.ebay.com/sch/i.html?_nkw={query}".to_string(),
            },
            Marketplace {
                name: "Poshmark".to_string(),
                search_url_pattern: "https://poshmark.com/search?query={query}".to_string(),
            },
            Marketplace {
                name: "Mercari".to_string(),
                search_url_pattern: "https://www.mercari.com/search/?keyword={query}".to_string(),
            },
        ];

        Self { marketplaces }
    }

    /// Fill the {query} placeholder with the URL-encoded search term
    pub fn build_search_url(pattern: &str, search_term: &str) -> String {
        let encoded_term = urlencoding::encode(search_term);
        pattern.replace("{query}", &encoded_term)
    }

    pub fn for_product(&self, product: &ProductInfo) -> Vec<Alternative> {
        let search_term = product.display_title();
        let amount = product.estimated_amount();
        let (low, high) = SECOND_HAND_PRICE_BAND;

        self.marketplaces
            .iter()
            .map(|marketplace| Alternative {
                marketplace: marketplace.name.clone(),
                search_url: Self::build_search_url(&marketplace.search_url_pattern, search_term),
                price_low: amount.map(|amount| round_cents(amount * low)),
                price_high: amount.map(|amount| round_cents(amount * high)),
            })
            .collect()
    }
}

impl Default for MarketplaceLinks {
    fn default() -> Self {
        Self::new()
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
