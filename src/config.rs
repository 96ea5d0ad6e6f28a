//! Classification and navigation policy, optionally loaded from a JSON file

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Keyword patterns that make a control a purchase-commit control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorPatterns {
    /// Matched against the control's visible text
    pub text_terms: Vec<String>,
    /// Matched against the control's id and class list
    pub id_class_patterns: Vec<String>,
    /// Matched against the enclosing form's `action` for submit/button controls
    pub form_action_terms: Vec<String>,
    /// Matched against the `name` attribute of submit/button controls
    pub name_terms: Vec<String>,
    /// Ids containing this marker belong to our own UI
    pub own_ui_prefix: String,
    /// Longer visible text is not used for classification
    pub max_text_len: usize,
}

impl Default for DetectorPatterns {
    fn default() -> Self {
        Self {
            text_terms: strings(&[
                "add to cart",
                "add to basket",
                "buy now",
                "checkout",
                "purchase",
                "proceed to checkout",
                "complete purchase",
                "place order",
            ]),
            id_class_patterns: strings(&[
                "add-to-cart",
                "addtocart",
                "add_to_cart",
                "buy-now",
                "buynow",
                "checkout",
                "cart-button",
                "cartbutton",
                "purchase",
                "submit-order",
            ]),
            form_action_terms: strings(&["cart", "checkout", "purchase", "buy"]),
            name_terms: strings(&["add", "cart", "buy", "checkout", "purchase"]),
            own_ui_prefix: "dineed".to_string(),
            max_text_len: 80,
        }
    }
}

/// Everything tunable about interception
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub patterns: DetectorPatterns,
    /// URL substrings that mark a cart/checkout page
    pub checkout_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            patterns: DetectorPatterns::default(),
            checkout_patterns: strings(&["cart", "checkout", "basket"]),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, or defaults when no path is given
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;

        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Crossing into one of these pages voids every earlier reflection
    pub fn is_checkout_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.checkout_patterns
            .iter()
            .any(|pattern| url.contains(&pattern.to_lowercase()))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
