//! Data models for purchase interception: product identity, watched controls,
//! gate states and the events that flow between the page and the gate

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResumeError;

/// Prefix of every durable gate record.
pub const GATE_KEY_PREFIX: &str = "gate:";

/// Placeholder shown when the site adapter could not find a product title.
pub const UNKNOWN_PRODUCT_TITLE: &str = "this item";

/// Normalized identity of the product being purchased.
///
/// Built from the canonical page URL with the query string and fragment
/// removed, so two SKUs that differ only by query parameter share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductKey(String);

impl ProductKey {
    pub fn from_url(url: &str) -> Self {
        let mut key = url.trim().to_string();

        if let Some(cut) = key.find(['?', '#']) {
            key.truncate(cut);
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the gate's durable state is stored (`gate:<productKey>`).
    pub fn storage_key(&self) -> String {
        format!("{GATE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductKey {
    fn from(url: &str) -> Self {
        Self::from_url(url)
    }
}

/// Product metadata shown in the reflection prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub title: String,
    pub price: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub url: String,
}

impl ProductInfo {
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            UNKNOWN_PRODUCT_TITLE
        } else {
            self.title.trim()
        }
    }

    /// Amount foregone when the purchase is skipped.
    ///
    /// Everything except digits and `.` is dropped from the price text before
    /// parsing; `None` when nothing parsable remains.
    pub fn estimated_amount(&self) -> Option<f64> {
        let digits: String = self
            .price
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        digits.parse::<f64>().ok().filter(|amount| amount.is_finite())
    }
}

/// Stable identity of a purchase-commit control on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlId(pub String);

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Form enclosing a watched control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormTarget {
    /// CSS path locating the form element
    pub selector: String,
    /// Raw `action` attribute, if any
    pub action: Option<String>,
}

/// A DOM control identified as a purchase-commit control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedControl {
    pub control_id: ControlId,
    /// CSS path locating the control element
    pub selector: String,
    pub tag: String,
    pub form: Option<FormTarget>,
    /// Resolved link target when the control is (or sits inside) an anchor
    pub href: Option<String>,
    pub listener_attached: bool,
}

/// The suppressed native action, kept until the episode is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub control_id: ControlId,
    pub selector: String,
    pub form: Option<FormTarget>,
    pub href: Option<String>,
    pub product: ProductInfo,
}

impl PendingAction {
    pub fn from_control(control: &WatchedControl, product: ProductInfo) -> Self {
        Self {
            control_id: control.control_id.clone(),
            selector: control.selector.clone(),
            form: control.form.clone(),
            href: control.href.clone(),
            product,
        }
    }
}

/// Per-product interception state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    #[default]
    Unseen,
    Prompted,
    Proceeded,
    Declined,
    DeferredToAlternatives,
}

impl GateState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unseen => "UNSEEN",
            Self::Prompted => "PROMPTED",
            Self::Proceeded => "PROCEEDED",
            Self::Declined => "DECLINED",
            Self::DeferredToAlternatives => "DEFERRED_TO_ALTERNATIVES",
        }
    }

    /// `PROCEEDED` and `DECLINED` never re-prompt until a reset.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Proceeded | Self::Declined)
    }

    /// A decision is outstanding and a `PendingAction` is held.
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Prompted | Self::DeferredToAlternatives)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSEEN" => Ok(Self::Unseen),
            "PROMPTED" => Ok(Self::Prompted),
            "PROCEEDED" => Ok(Self::Proceeded),
            "DECLINED" => Ok(Self::Declined),
            "DEFERRED_TO_ALTERNATIVES" => Ok(Self::DeferredToAlternatives),
            other => Err(anyhow::anyhow!("Unknown gate state: {other}")),
        }
    }
}

/// Answer of the gate to a purchase intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Suppress the native action and open a reflection prompt.
    SuppressAndPrompt,
    /// Let the native action continue untouched.
    PassThrough,
    /// A prompt for this product is already open: suppress, but do not prompt again.
    AlreadyPending,
}

impl Decision {
    pub const fn suppresses(self) -> bool {
        matches!(self, Self::SuppressAndPrompt | Self::AlreadyPending)
    }
}

/// One `PROMPTED` episode of a gate; a reset followed by a new intent
/// opens a new one for the same product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EpisodeId(pub u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of feeding a user decision into the gate
#[derive(Debug)]
pub enum Resolution {
    Transitioned(GateState),
    /// `PROCEEDED` and the suppressed action was replayed.
    Resumed,
    /// `PROCEEDED` but the suppressed action could not be replayed.
    ResumeFailed(ResumeError),
    /// No open episode for this product; nothing changed.
    NotPending,
}

/// Choice offered by the reflection prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserChoice {
    Proceed,
    Decline,
    ViewAlternatives,
}

/// Choice offered by the alternatives view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativesChoice {
    Proceed,
    Decline,
}

impl From<AlternativesChoice> for UserChoice {
    fn from(choice: AlternativesChoice) -> Self {
        match choice {
            AlternativesChoice::Proceed => Self::Proceed,
            AlternativesChoice::Decline => Self::Decline,
        }
    }
}

/// Non-fatal messages surfaced by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PurchaseSkipped,
    ResumeFailed(String),
}

/// A click delivered by the page to the interceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickEvent {
    pub target: ControlId,
    /// `false` for clicks synthesized by the resume dispatcher
    pub trusted: bool,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl ClickEvent {
    pub fn user(target: ControlId) -> Self {
        Self {
            target,
            trusted: true,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn synthetic(target: ControlId) -> Self {
        Self {
            trusted: false,
            ..Self::user(target)
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub const fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub const fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Signals the page feeds into the interceptor's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Loaded,
    DomReady,
    /// Subtree mutation observed
    Mutated,
    Click(ClickEvent),
    Navigated(String),
}

/// Running totals of skipped purchases
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeclineSummary {
    pub reconsidered_count: i64,
    pub money_saved: f64,
    pub co2_saved_kg: f64,
}
