use std::sync::Arc;

use anyhow::Result;
use scraper::Html;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::detector::{IntentDetector, ScanReport};
use crate::gate::InterceptionGate;
use crate::models::{
    ClickEvent, Decision, GateState, Notice, PageEvent, PendingAction,
    ProductInfo, ProductKey, Resolution, UserChoice, WatchedControl,
};
use crate::resume::ResumeDispatcher;
use crate::sites::{SiteRegistry, canonical_url};
use crate::traits::{GateStore, PageDriver, Presenter, StatisticsStore};

/// Wires detector, gate and presenter to one page
pub struct Interceptor {
    page: Arc<dyn PageDriver>,
    settings: Settings,
    sites: SiteRegistry,
    detector: Mutex<IntentDetector>,
    gate: InterceptionGate,
    presenter: Arc<dyn Presenter>,
}

impl Interceptor {
    pub fn new(
        page: Arc<dyn PageDriver>,
        settings: Settings,
        sites: SiteRegistry,
        store: Arc<dyn GateStore>,
        stats: Arc<dyn StatisticsStore>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let detector = IntentDetector::new(settings.patterns.clone());
        let gate = InterceptionGate::new(store, stats, ResumeDispatcher::new(page.clone()));

        Self {
            page,
            settings,
            sites,
            detector: Mutex::new(detector),
            gate,
            presenter,
        }
    }

    pub fn gate(&self) -> &InterceptionGate {
        &self.gate
    }

    pub async fn rescan(&self) -> ScanReport {
        let url = self.page.url();
        let site_selectors = self
            .sites
            .for_url(&url)
            .config()
            .selectors
            .purchase_controls
            .clone();

        self.detector
            .lock()
            .await
            .scan(self.page.as_ref(), &site_selectors)
    }

    pub async fn watched_controls(&self) -> Vec<WatchedControl> {
        self.detector
            .lock()
            .await
            .watched()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Product identity and metadata for the page as it is right now
    pub fn current_product(&self) -> (ProductKey, ProductInfo) {
        let url = self.page.url();
        let html = self.page.html();
        let document = Html::parse_document(&html);

        let key = ProductKey::from_url(&canonical_url(&document, &url));
        let product = self
            .sites
            .for_url(&url)
            .extract_product_info(&document, &url);

        (key, product)
    }

    /// Handle a click on a watched control
    ///
    /// The gate is consulted before anything is suppressed, so clicks on a
    /// settled product behave like ordinary native clicks.
    ///
    /// # Returns
    /// * `Option<ProductKey>` - The product to open a reflection prompt for
    pub async fn on_click(&self, event: &mut ClickEvent) -> Option<ProductKey> {
        let control = self.detector.lock().await.control(&event.target).cloned()?;
        if !control.listener_attached {
            return None;
        }

        let (key, product) = self.current_product();
        let action = PendingAction::from_control(&control, product);
        let decision = self.gate.handle_intent(&key, action).await;

        if decision.suppresses() {
            event.prevent_default();
            event.stop_propagation();
        }

        debug!(
            "Click on {} (trusted: {}) for {}: {:?}",
            control.selector, event.trusted, key, decision
        );
        (decision == Decision::SuppressAndPrompt).then_some(key)
    }

    /// Reset every gate when the page moves to a cart or checkout URL
    pub async fn on_navigation(&self, url: &str) -> bool {
        if !self.settings.is_checkout_url(url) {
            return false;
        }

        info!("Checkout page reached ({}), reflection starts over", url);
        self.gate.reset_all().await;
        true
    }

    /// Ask the user about the open episode for `key` and settle the gate
    ///
    /// The answer applies only to the episode that was open when the prompt
    /// appeared. A presenter failure leaves the episode open; there is no
    /// timeout.
    pub async fn reflect(&self, key: &ProductKey) -> Result<Resolution> {
        let Some((episode, product)) = self.gate.open_episode(key).await else {
            return Ok(Resolution::NotPending);
        };

        let resolution = match self.presenter.prompt_user(&product).await? {
            UserChoice::ViewAlternatives => {
                let deferred = self
                    .gate
                    .resolve_episode(key, episode, UserChoice::ViewAlternatives)
                    .await;
                if matches!(deferred, Resolution::NotPending) {
                    info!(
                        "Episode {} for {} was abandoned, not showing alternatives",
                        episode, key
                    );
                    return Ok(deferred);
                }

                let choice = self.presenter.show_alternatives(&product).await?;
                self.gate.resolve_episode(key, episode, choice.into()).await
            }
            choice => self.gate.resolve_episode(key, episode, choice).await,
        };

        match &resolution {
            Resolution::Transitioned(GateState::Declined) => {
                self.presenter.show_notice(&Notice::PurchaseSkipped).await;
            }
            Resolution::ResumeFailed(e) => {
                warn!("Purchase of {} not resumed on control {}", key, e.control());
                self.presenter
                    .show_notice(&Notice::ResumeFailed(e.to_string()))
                    .await;
            }
            _ => {}
        }

        Ok(resolution)
    }

    /// Process one page event in order
    ///
    /// # Returns
    /// * `Option<ProductKey>` - A product whose reflection prompt should open now
    pub async fn handle_event(&self, event: PageEvent) -> Option<ProductKey> {
        match event {
            PageEvent::Loaded => {
                self.on_navigation(&self.page.url()).await;
                self.rescan().await;
                None
            }
            PageEvent::DomReady | PageEvent::Mutated => {
                self.rescan().await;
                None
            }
            PageEvent::Click(mut click) => {
                let key = self.on_click(&mut click).await;
                self.page.finish_click(&click);
                key
            }
            PageEvent::Navigated(url) => {
                self.on_navigation(&url).await;
                self.rescan().await;
                None
            }
        }
    }

    /// Event loop for long-lived pages; prompts run as their own tasks so
    /// clicks keep being handled while one is open
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<PageEvent>) {
        info!("Listening for page events on {}", self.page.url());

        while let Some(event) = events.recv().await {
            let Some(key) = self.handle_event(event).await else {
                continue;
            };

            let interceptor = Arc::clone(&self);
            tokio::spawn(async move {
                match interceptor.reflect(&key).await {
                    Ok(resolution) => debug!("Reflection on {} ended: {:?}", key, resolution),
                    Err(e) => warn!("Reflection prompt for {} abandoned: {}", key, e),
                }
            });
        }

        info!("Page event channel closed");
    }
}
