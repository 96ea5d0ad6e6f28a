//! Headless page backed by an HTML snapshot.
//!
//! Stands in for the browser DOM: it answers selector lookups from the
//! snapshot, remembers which controls carry a listener, records every action
//! the core asks it to perform, and feeds synthetic clicks and navigations
//! back into the event channel the way a real page would.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::models::{ClickEvent, ControlId, FormTarget, PageEvent, WatchedControl};
use crate::traits::PageDriver;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Something the page did on behalf of the core or the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    ListenerAttached(ControlId),
    FormSubmitted { selector: String, action: Option<String> },
    SyntheticClick(ControlId),
    Navigated(String),
    /// The native default action of a click ran
    NativeDefault(ControlId),
    /// The click's default action was suppressed
    DefaultPrevented(ControlId),
}

#[derive(Debug)]
struct Listener {
    selector: String,
    count: usize,
}

pub struct SnapshotPage {
    url: Mutex<String>,
    html: Mutex<String>,
    listeners: Mutex<HashMap<ControlId, Listener>>,
    actions: Mutex<Vec<PageAction>>,
    events: Option<UnboundedSender<PageEvent>>,
}

impl SnapshotPage {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            html: Mutex::new(html.to_string()),
            listeners: Mutex::new(HashMap::new()),
            actions: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// Feed synthetic clicks and navigations into `events`
    pub fn with_events(mut self, events: UnboundedSender<PageEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Download a product page
    pub async fn fetch(url: &str) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;

        info!("Fetching product page {}", url);
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch product page {}: {}",
                url,
                response.status()
            ));
        }

        let html = response.text().await?;
        Ok(Self::new(url, &html))
    }

    /// Load a saved product page; `url` is the address it was saved from
    pub async fn from_file(path: &Path, url: &str) -> Result<Self> {
        let html = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read page snapshot {}", path.display()))?;
        Ok(Self::new(url, &html))
    }

    /// Replace the document, dropping listeners whose node is gone
    pub fn set_html(&self, html: &str) {
        *lock(&self.html) = html.to_string();

        let document = Html::parse_document(html);
        lock(&self.listeners).retain(|_, listener| selector_matches(&document, &listener.selector));
    }

    /// Replace the document and report the subtree mutation
    pub fn mutate(&self, html: &str) {
        self.set_html(html);
        self.emit(PageEvent::Mutated);
    }

    /// A user click on the control (not yet handled by anyone)
    pub fn user_click(&self, control: &ControlId) -> ClickEvent {
        ClickEvent::user(control.clone())
    }

    pub fn listener_count(&self, control: &ControlId) -> usize {
        lock(&self.listeners).get(control).map_or(0, |listener| listener.count)
    }

    pub fn actions(&self) -> Vec<PageAction> {
        lock(&self.actions).clone()
    }

    fn record(&self, action: PageAction) {
        lock(&self.actions).push(action);
    }

    fn emit(&self, event: PageEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            warn!("Page event dropped: interceptor is gone");
        }
    }
}

impl PageDriver for SnapshotPage {
    fn url(&self) -> String {
        lock(&self.url).clone()
    }

    fn html(&self) -> String {
        lock(&self.html).clone()
    }

    fn attach_listener(&self, control: &WatchedControl) -> Result<()> {
        if !self.is_connected(&control.selector) {
            return Err(anyhow::anyhow!("No element matches {}", control.selector));
        }

        lock(&self.listeners)
            .entry(control.control_id.clone())
            .or_insert_with(|| Listener {
                selector: control.selector.clone(),
                count: 0,
            })
            .count += 1;
        self.record(PageAction::ListenerAttached(control.control_id.clone()));
        Ok(())
    }

    fn is_connected(&self, selector: &str) -> bool {
        let html = self.html();
        let document = Html::parse_document(&html);
        selector_matches(&document, selector)
    }

    fn submit_form(&self, form: &FormTarget) -> Result<()> {
        if !self.is_connected(&form.selector) {
            return Err(anyhow::anyhow!("Form {} is no longer on the page", form.selector));
        }

        info!(
            "Submitting form {} to {}",
            form.selector,
            form.action.as_deref().unwrap_or("the current page")
        );
        self.record(PageAction::FormSubmitted {
            selector: form.selector.clone(),
            action: form.action.clone(),
        });
        Ok(())
    }

    fn click(&self, control: &ControlId, selector: &str) -> Result<()> {
        if !self.is_connected(selector) {
            return Err(anyhow::anyhow!("Control {} is no longer on the page", selector));
        }

        debug!("Dispatching synthetic click on {}", selector);
        self.record(PageAction::SyntheticClick(control.clone()));
        self.emit(PageEvent::Click(ClickEvent::synthetic(control.clone())));
        Ok(())
    }

    fn navigate(&self, href: &str) -> Result<()> {
        info!("Navigating to {}", href);
        *lock(&self.url) = href.to_string();
        self.record(PageAction::Navigated(href.to_string()));
        self.emit(PageEvent::Navigated(href.to_string()));
        Ok(())
    }

    fn finish_click(&self, event: &ClickEvent) {
        if event.default_prevented() {
            self.record(PageAction::DefaultPrevented(event.target.clone()));
        } else {
            self.record(PageAction::NativeDefault(event.target.clone()));
        }
    }
}

fn selector_matches(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|selector| document.select(&selector).next().is_some())
        .unwrap_or(false)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
