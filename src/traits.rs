//! Traits for the collaborators the interception core talks to: the page,
//! site adapters, durable storage, statistics and the presentation layer

use anyhow::Result;
use async_trait::async_trait;
use scraper::Html;

use crate::models::{
    AlternativesChoice, ClickEvent, ControlId, DeclineSummary, FormTarget, GateState, Notice,
    ProductInfo, ProductKey, UserChoice, WatchedControl,
};

/// Configuration for a site adapter
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Display name for the website
    pub name: String,
    /// Substring matched against the page host; empty matches every host
    pub host_pattern: String,
    /// CSS selectors for extracting data
    pub selectors: SiteSelectors,
}

/// CSS selectors for the parts of a product page the core cares about
#[derive(Debug, Clone, Default)]
pub struct SiteSelectors {
    /// Controls that always count as purchase-commit controls on this site
    pub purchase_controls: Vec<String>,
    /// Product title, tried in order
    pub title: Vec<String>,
    /// Product price, tried in order
    pub price: Vec<String>,
    /// Breadcrumb entries; the first one is used as category (optional)
    pub category: Option<String>,
    /// Main product image, tried in order
    pub image: Vec<String>,
}

/// Site-specific knowledge: control selectors and product metadata extraction
pub trait SiteAdapter: Send + Sync {
    fn config(&self) -> &SiteConfig;

    /// Extract title, price and friends from a parsed product page
    ///
    /// # Arguments
    /// * `document` - The parsed HTML document
    /// * `page_url` - URL the document was loaded from
    fn extract_product_info(&self, document: &Html, page_url: &str) -> ProductInfo;

    /// Whether this adapter handles pages served from `host`
    fn matches_host(&self, host: &str) -> bool {
        let pattern = &self.config().host_pattern;
        pattern.is_empty() || host.to_lowercase().contains(&pattern.to_lowercase())
    }
}

/// The live page the core runs against.
///
/// Implementations own the DOM; the core only addresses elements through the
/// CSS paths it computed during a scan.
pub trait PageDriver: Send + Sync {
    /// Current location of the page
    fn url(&self) -> String;

    /// Serialized snapshot of the current document
    fn html(&self) -> String;

    /// Route clicks on `control` to the interceptor (capturing phase)
    fn attach_listener(&self, control: &WatchedControl) -> Result<()>;

    /// Whether an element matching `selector` is still in the document
    fn is_connected(&self, selector: &str) -> bool;

    fn submit_form(&self, form: &FormTarget) -> Result<()>;

    /// Dispatch a synthetic click on the control
    fn click(&self, control: &ControlId, selector: &str) -> Result<()>;

    fn navigate(&self, href: &str) -> Result<()>;

    /// Apply or drop the native default action once the handler returned
    fn finish_click(&self, event: &ClickEvent);
}

/// Durable `gate:<productKey>` records
///
/// Only `UNSEEN`, `PROCEEDED` and `DECLINED` are ever written; an absent key
/// reads as `UNSEEN`.
#[async_trait]
pub trait GateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<GateState>>;

    async fn set(&self, key: &str, state: GateState) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every record whose key starts with `prefix`
    ///
    /// # Returns
    /// * `Result<u64>` - Number of removed records
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Bookkeeping for skipped purchases
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn record_decline(&self, product: &ProductKey, amount: Option<f64>) -> Result<()>;

    async fn summary(&self) -> Result<DeclineSummary>;
}

/// The reflection prompt and the alternatives view
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn prompt_user(&self, product: &ProductInfo) -> Result<UserChoice>;

    async fn show_alternatives(&self, product: &ProductInfo) -> Result<AlternativesChoice>;

    async fn show_notice(&self, notice: &Notice);
}
