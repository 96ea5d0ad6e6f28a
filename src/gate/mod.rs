//! Per-product interception gate.
//!
//! ```text
//! UNSEEN ──intent──▶ PROMPTED ──proceed──▶ PROCEEDED
//!                      │   ╲──decline───▶ DECLINED
//!                      ▼
//!          DEFERRED_TO_ALTERNATIVES ──proceed / decline──▶ …
//! ```
//!
//! Terminal states let every later intent pass through until a reset. Only
//! terminal states are written to the durable store; an interrupted prompt
//! reads back as `UNSEEN` after a reload because its `PendingAction` cannot
//! survive one. Store failures switch the gate to in-memory-only mode for
//! the rest of the session. No public operation returns an error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{
    Decision, EpisodeId, GATE_KEY_PREFIX, GateState, PendingAction, ProductInfo, ProductKey,
    Resolution, UserChoice,
};
use crate::resume::ResumeDispatcher;
use crate::traits::{GateStore, StatisticsStore};

struct GateEntry {
    state: GateState,
    /// Held only while `state.is_pending()`
    pending: Option<PendingAction>,
    episode: EpisodeId,
}

#[derive(Default)]
struct GateTable {
    gates: HashMap<ProductKey, GateEntry>,
    /// Episodes opened so far; never reset
    episodes: u64,
    degraded: bool,
}

pub struct InterceptionGate {
    table: Mutex<GateTable>,
    store: Arc<dyn GateStore>,
    stats: Arc<dyn StatisticsStore>,
    dispatcher: ResumeDispatcher,
}

impl InterceptionGate {
    pub fn new(
        store: Arc<dyn GateStore>,
        stats: Arc<dyn StatisticsStore>,
        dispatcher: ResumeDispatcher,
    ) -> Self {
        Self {
            table: Mutex::new(GateTable::default()),
            store,
            stats,
            dispatcher,
        }
    }

    /// Decide whether a purchase intent for `key` is paused for reflection
    ///
    /// # Returns
    /// * `Decision::SuppressAndPrompt` - `action` is now held; open a prompt
    /// * `Decision::AlreadyPending` - a prompt is open already; `action` is dropped
    /// * `Decision::PassThrough` - the product is settled; let the click through
    pub async fn handle_intent(&self, key: &ProductKey, action: PendingAction) -> Decision {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;

        if !table.gates.contains_key(key) {
            let state = self.load(table, key).await;
            table.gates.insert(
                key.clone(),
                GateEntry {
                    state,
                    pending: None,
                    episode: EpisodeId::default(),
                },
            );
        }

        let Some(entry) = table.gates.get_mut(key) else {
            return Decision::PassThrough;
        };

        if entry.state.is_terminal() {
            debug!("{} already {}, letting purchase through", key, entry.state);
            return Decision::PassThrough;
        }

        if entry.state.is_pending() {
            info!("Decision for {} still pending ({}), not prompting again", key, entry.state);
            return Decision::AlreadyPending;
        }

        table.episodes += 1;
        entry.state = GateState::Prompted;
        entry.pending = Some(action);
        entry.episode = EpisodeId(table.episodes);
        info!(
            "Purchase intent for {} paused for reflection (episode {})",
            key, entry.episode
        );
        Decision::SuppressAndPrompt
    }

    /// User confirmed the purchase: settle as `PROCEEDED` and replay the held action
    pub async fn resolve_proceed(&self, key: &ProductKey) -> Resolution {
        self.proceed(key, None).await
    }

    /// User skipped the purchase: settle as `DECLINED` and drop the held action
    pub async fn resolve_decline(&self, key: &ProductKey) -> Resolution {
        self.decline(key, None).await
    }

    /// User wants alternatives first; the episode stays open until proceed or decline
    pub async fn resolve_view_alternatives(&self, key: &ProductKey) -> Resolution {
        self.view_alternatives(key, None).await
    }

    /// Apply `choice` only if `episode` is still the open episode for `key`
    ///
    /// An answer from a prompt whose episode was abandoned by a reset
    /// resolves to `NotPending` and leaves any newer episode untouched.
    pub async fn resolve_episode(
        &self,
        key: &ProductKey,
        episode: EpisodeId,
        choice: UserChoice,
    ) -> Resolution {
        match choice {
            UserChoice::Proceed => self.proceed(key, Some(episode)).await,
            UserChoice::Decline => self.decline(key, Some(episode)).await,
            UserChoice::ViewAlternatives => self.view_alternatives(key, Some(episode)).await,
        }
    }

    async fn proceed(&self, key: &ProductKey, expected: Option<EpisodeId>) -> Resolution {
        let action = {
            let mut table = self.table.lock().await;
            let Some(entry) = Self::open_entry(&mut table, key, expected) else {
                return Resolution::NotPending;
            };

            entry.state = GateState::Proceeded;
            let action = entry.pending.take();
            self.persist(&mut table, key, GateState::Proceeded).await;
            action
        };

        info!("User proceeded with {}", key);

        // The gate is terminal before the replay so a re-entering click passes through
        let Some(action) = action else {
            return Resolution::Transitioned(GateState::Proceeded);
        };
        match self.dispatcher.resume(&action) {
            Ok(()) => Resolution::Resumed,
            Err(e) => Resolution::ResumeFailed(e),
        }
    }

    async fn decline(&self, key: &ProductKey, expected: Option<EpisodeId>) -> Resolution {
        let action = {
            let mut table = self.table.lock().await;
            let Some(entry) = Self::open_entry(&mut table, key, expected) else {
                return Resolution::NotPending;
            };

            entry.state = GateState::Declined;
            let action = entry.pending.take();
            self.persist(&mut table, key, GateState::Declined).await;
            action
        };

        let amount = action.and_then(|action| action.product.estimated_amount());
        info!("User declined {} (amount foregone: {:?})", key, amount);

        if let Err(e) = self.stats.record_decline(key, amount).await {
            warn!("Failed to record declined purchase for {}: {}", key, e);
        }

        Resolution::Transitioned(GateState::Declined)
    }

    async fn view_alternatives(&self, key: &ProductKey, expected: Option<EpisodeId>) -> Resolution {
        let mut table = self.table.lock().await;
        let Some(entry) = Self::open_entry(&mut table, key, expected) else {
            return Resolution::NotPending;
        };

        entry.state = GateState::DeferredToAlternatives;
        info!("Showing alternatives for {}", key);
        Resolution::Transitioned(GateState::DeferredToAlternatives)
    }

    /// The open episode of `key`, if it is the `expected` one
    fn open_entry<'a>(
        table: &'a mut GateTable,
        key: &ProductKey,
        expected: Option<EpisodeId>,
    ) -> Option<&'a mut GateEntry> {
        let entry = table.gates.get_mut(key)?;
        if !entry.state.is_pending() {
            return None;
        }

        if let Some(expected) = expected
            && expected != entry.episode
        {
            debug!(
                "Ignoring answer for abandoned episode {} of {} (open: {})",
                expected, key, entry.episode
            );
            return None;
        }

        Some(entry)
    }

    /// Forget everything about one product, including an open episode
    pub async fn reset(&self, key: &ProductKey) {
        let mut table = self.table.lock().await;
        table.gates.remove(key);
        self.persist(&mut table, key, GateState::Unseen).await;
        info!("Reset reflection state for {}", key);
    }

    /// Every product back to `UNSEEN`; open episodes are abandoned
    pub async fn reset_all(&self) {
        let mut table = self.table.lock().await;
        let in_memory = table.gates.len();
        table.gates.clear();

        let durable = if table.degraded {
            0
        } else {
            match self.store.delete_prefix(GATE_KEY_PREFIX).await {
                Ok(removed) => removed,
                Err(e) => {
                    Self::degrade(&mut table, &e);
                    0
                }
            }
        };

        info!(
            "Reset reflection state for all products ({} in session, {} stored)",
            in_memory, durable
        );
    }

    pub async fn state(&self, key: &ProductKey) -> GateState {
        let mut table = self.table.lock().await;
        if let Some(entry) = table.gates.get(key) {
            return entry.state;
        }
        self.load(&mut table, key).await
    }

    /// The open episode for `key` and the product its prompt shows
    pub async fn open_episode(&self, key: &ProductKey) -> Option<(EpisodeId, ProductInfo)> {
        self.table
            .lock()
            .await
            .gates
            .get(key)
            .and_then(|entry| {
                entry
                    .pending
                    .as_ref()
                    .map(|action| (entry.episode, action.product.clone()))
            })
    }

    /// Whether the durable store has been given up on for this session
    pub async fn is_degraded(&self) -> bool {
        self.table.lock().await.degraded
    }

    async fn load(&self, table: &mut GateTable, key: &ProductKey) -> GateState {
        if table.degraded {
            return GateState::Unseen;
        }

        match self.store.get(&key.storage_key()).await {
            Ok(Some(state)) if state.is_terminal() => state,
            Ok(_) => GateState::Unseen,
            Err(e) => {
                Self::degrade(table, &e);
                GateState::Unseen
            }
        }
    }

    async fn persist(&self, table: &mut GateTable, key: &ProductKey, state: GateState) {
        if table.degraded {
            return;
        }

        let result = if state == GateState::Unseen {
            self.store.delete(&key.storage_key()).await
        } else {
            self.store.set(&key.storage_key(), state).await
        };

        if let Err(e) = result {
            Self::degrade(table, &e);
        }
    }

    fn degrade(table: &mut GateTable, error: &anyhow::Error) {
        if !table.degraded {
            warn!(
                "Gate store unavailable ({}); keeping reflection state in memory for this session",
                error
            );
            table.degraded = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::database::MemoryStore;
    use crate::error::ResumeError;
    use crate::models::{ControlId, FormTarget};
    use crate::page::{PageAction, SnapshotPage};

    const PAGE: &str = r#"<html><body>
        <button id="add-to-cart">Add to cart</button>
        <form id="buy-form" action="/cart/add"><button id="buy">Buy now</button></form>
    </body></html>"#;

    struct Harness {
        page: Arc<SnapshotPage>,
        store: Arc<MemoryStore>,
        gate: InterceptionGate,
    }

    fn harness_with(store: Arc<MemoryStore>) -> Harness {
        let page = Arc::new(SnapshotPage::new("https://shop.example/p/1", PAGE));
        let gate = InterceptionGate::new(
            store.clone(),
            store.clone(),
            ResumeDispatcher::new(page.clone()),
        );
        Harness { page, store, gate }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStore::new()))
    }

    fn action(selector: &str, price: &str) -> PendingAction {
        PendingAction {
            control_id: ControlId(format!("ctl{selector}")),
            selector: selector.to_string(),
            form: None,
            href: None,
            product: ProductInfo {
                title: "Field Boot".to_string(),
                price: price.to_string(),
                ..ProductInfo::default()
            },
        }
    }

    fn key(name: &str) -> ProductKey {
        ProductKey::from_url(&format!("https://shop.example/{name}"))
    }

    #[tokio::test]
    async fn declined_product_passes_through() {
        let h = harness();
        let p1 = key("p1");

        assert_eq!(
            h.gate.handle_intent(&p1, action("#add-to-cart", "$20")).await,
            Decision::SuppressAndPrompt
        );
        assert!(matches!(
            h.gate.resolve_decline(&p1).await,
            Resolution::Transitioned(GateState::Declined)
        ));
        assert_eq!(
            h.gate.handle_intent(&p1, action("#add-to-cart", "$20")).await,
            Decision::PassThrough
        );

        assert_eq!(h.store.declines().await, vec![(p1, Some(20.0))]);
        assert!(h.page.actions().is_empty());
    }

    #[tokio::test]
    async fn proceed_resumes_held_action_once() {
        let h = harness();
        let p1 = key("p1");
        let first = action("#add-to-cart", "$20");

        h.gate.handle_intent(&p1, first.clone()).await;
        assert!(matches!(h.gate.resolve_proceed(&p1).await, Resolution::Resumed));
        assert!(matches!(h.gate.resolve_proceed(&p1).await, Resolution::NotPending));
        assert!(matches!(h.gate.resolve_decline(&p1).await, Resolution::NotPending));

        assert_eq!(
            h.page.actions(),
            vec![PageAction::SyntheticClick(first.control_id)]
        );
        assert_eq!(h.gate.state(&p1).await, GateState::Proceeded);
        assert_eq!(
            h.gate.handle_intent(&p1, action("#add-to-cart", "$20")).await,
            Decision::PassThrough
        );
    }

    #[tokio::test]
    async fn form_actions_resume_by_submit() {
        let h = harness();
        let p1 = key("p1");
        let mut held = action("#buy", "$5");
        held.form = Some(FormTarget {
            selector: "#buy-form".to_string(),
            action: Some("/cart/add".to_string()),
        });

        h.gate.handle_intent(&p1, held).await;
        h.gate.resolve_proceed(&p1).await;

        assert_eq!(
            h.page.actions(),
            vec![PageAction::FormSubmitted {
                selector: "#buy-form".to_string(),
                action: Some("/cart/add".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn deferred_episode_is_not_prompted_twice() {
        let h = harness();
        let p1 = key("p1");
        let first = action("#add-to-cart", "$20");

        h.gate.handle_intent(&p1, first.clone()).await;
        assert!(matches!(
            h.gate.resolve_view_alternatives(&p1).await,
            Resolution::Transitioned(GateState::DeferredToAlternatives)
        ));

        let again = h.gate.handle_intent(&p1, action("#buy", "$20")).await;
        assert_eq!(again, Decision::AlreadyPending);
        assert!(again.suppresses());
        assert_eq!(h.gate.state(&p1).await, GateState::DeferredToAlternatives);

        // the first episode's action is the one that gets resumed
        assert!(matches!(h.gate.resolve_proceed(&p1).await, Resolution::Resumed));
        assert_eq!(h.page.actions(), vec![PageAction::SyntheticClick(first.control_id)]);
    }

    #[tokio::test]
    async fn prompted_intent_is_already_pending() {
        let h = harness();
        let p1 = key("p1");

        h.gate.handle_intent(&p1, action("#add-to-cart", "")).await;
        assert_eq!(
            h.gate.handle_intent(&p1, action("#add-to-cart", "")).await,
            Decision::AlreadyPending
        );
    }

    #[tokio::test]
    async fn reset_all_reopens_every_product() {
        let h = harness();
        let (p1, p2) = (key("p1"), key("p2"));

        h.gate.handle_intent(&p1, action("#add-to-cart", "")).await;
        h.gate.resolve_decline(&p1).await;
        h.gate.handle_intent(&p2, action("#add-to-cart", "")).await;
        h.gate.resolve_proceed(&p2).await;

        h.gate.reset_all().await;

        assert_eq!(
            h.gate.handle_intent(&p1, action("#add-to-cart", "")).await,
            Decision::SuppressAndPrompt
        );
        assert_eq!(
            h.gate.handle_intent(&p2, action("#add-to-cart", "")).await,
            Decision::SuppressAndPrompt
        );
        assert_eq!(h.store.get(&p1.storage_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn answer_for_abandoned_episode_is_ignored() {
        let h = harness();
        let p1 = key("p1");

        h.gate.handle_intent(&p1, action("#add-to-cart", "$20")).await;
        let (first, product) = h.gate.open_episode(&p1).await.unwrap();
        assert_eq!(product.title, "Field Boot");

        h.gate.reset_all().await;
        assert!(h.gate.open_episode(&p1).await.is_none());
        h.gate.handle_intent(&p1, action("#add-to-cart", "$20")).await;
        let (second, _) = h.gate.open_episode(&p1).await.unwrap();
        assert_ne!(first, second);

        assert!(matches!(
            h.gate.resolve_episode(&p1, first, UserChoice::Decline).await,
            Resolution::NotPending
        ));
        assert_eq!(h.gate.state(&p1).await, GateState::Prompted);
        assert!(h.store.declines().await.is_empty());

        assert!(matches!(
            h.gate.resolve_episode(&p1, second, UserChoice::ViewAlternatives).await,
            Resolution::Transitioned(GateState::DeferredToAlternatives)
        ));
        assert!(matches!(
            h.gate.resolve_episode(&p1, second, UserChoice::Proceed).await,
            Resolution::Resumed
        ));
    }

    #[tokio::test]
    async fn resume_failure_keeps_proceeded() {
        let h = harness();
        let p1 = key("p1");

        h.gate.handle_intent(&p1, action("#removed", "")).await;
        let resolution = h.gate.resolve_proceed(&p1).await;

        assert!(matches!(
            resolution,
            Resolution::ResumeFailed(ResumeError::ControlGone { .. })
        ));
        assert_eq!(h.gate.state(&p1).await, GateState::Proceeded);
    }

    #[tokio::test]
    async fn settled_state_survives_reload() {
        let store = Arc::new(MemoryStore::new());
        let (settled, interrupted) = (key("settled"), key("interrupted"));

        let first = harness_with(store.clone());
        first.gate.handle_intent(&settled, action("#add-to-cart", "")).await;
        first.gate.resolve_decline(&settled).await;
        first.gate.handle_intent(&interrupted, action("#add-to-cart", "")).await;

        // a reload builds a fresh gate over the same store
        let reloaded = harness_with(store);
        assert_eq!(
            reloaded.gate.handle_intent(&settled, action("#add-to-cart", "")).await,
            Decision::PassThrough
        );
        assert_eq!(
            reloaded.gate.handle_intent(&interrupted, action("#add-to-cart", "")).await,
            Decision::SuppressAndPrompt
        );
    }

    #[tokio::test]
    async fn per_product_reset_leaves_others_settled() {
        let h = harness();
        let (p1, p2) = (key("p1"), key("p2"));
        for product in [&p1, &p2] {
            h.gate.handle_intent(product, action("#add-to-cart", "")).await;
            h.gate.resolve_decline(product).await;
        }

        h.gate.reset(&p1).await;

        assert_eq!(h.gate.state(&p1).await, GateState::Unseen);
        assert_eq!(h.gate.state(&p2).await, GateState::Declined);
    }

    #[tokio::test]
    async fn resolving_unknown_product_changes_nothing() {
        let h = harness();
        let ghost = key("ghost");

        assert!(matches!(h.gate.resolve_proceed(&ghost).await, Resolution::NotPending));
        assert!(matches!(h.gate.resolve_decline(&ghost).await, Resolution::NotPending));
        assert!(matches!(
            h.gate.resolve_view_alternatives(&ghost).await,
            Resolution::NotPending
        ));
        assert!(h.store.declines().await.is_empty());
    }

    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GateStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<GateState>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("storage quota exceeded"))
        }

        async fn set(&self, _key: &str, _state: GateState) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("storage quota exceeded"))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("storage quota exceeded"))
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("storage quota exceeded"))
        }
    }

    #[tokio::test]
    async fn broken_store_degrades_to_memory() {
        let store = Arc::new(BrokenStore {
            calls: AtomicUsize::new(0),
        });
        let page = Arc::new(SnapshotPage::new("https://shop.example/p/1", PAGE));
        let gate = InterceptionGate::new(
            store.clone(),
            Arc::new(MemoryStore::new()),
            ResumeDispatcher::new(page),
        );
        let p1 = key("p1");

        assert_eq!(
            gate.handle_intent(&p1, action("#add-to-cart", "")).await,
            Decision::SuppressAndPrompt
        );
        assert!(gate.is_degraded().await);

        gate.resolve_decline(&p1).await;
        assert_eq!(
            gate.handle_intent(&p1, action("#add-to-cart", "")).await,
            Decision::PassThrough
        );
        gate.reset_all().await;

        // the store is given up on after the first failure
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
