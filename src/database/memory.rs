//! In-process store: used when the database is unavailable and in tests

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::CO2_SAVED_PER_DECLINE_KG;
use crate::models::{DeclineSummary, GateState, ProductKey};
use crate::traits::{GateStore, StatisticsStore};

#[derive(Default)]
pub struct MemoryStore {
    gates: Mutex<HashMap<String, GateState>>,
    declines: Mutex<Vec<(ProductKey, Option<f64>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn declines(&self) -> Vec<(ProductKey, Option<f64>)> {
        self.declines.lock().await.clone()
    }
}

#[async_trait]
impl GateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<GateState>> {
        Ok(self.gates.lock().await.get(key).copied())
    }

    async fn set(&self, key: &str, state: GateState) -> Result<()> {
        self.gates.lock().await.insert(key.to_string(), state);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.gates.lock().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut gates = self.gates.lock().await;
        let before = gates.len();
        gates.retain(|key, _| !key.starts_with(prefix));
        Ok((before - gates.len()) as u64)
    }
}

#[async_trait]
impl StatisticsStore for MemoryStore {
    async fn record_decline(&self, product: &ProductKey, amount: Option<f64>) -> Result<()> {
        self.declines.lock().await.push((product.clone(), amount));
        Ok(())
    }

    async fn summary(&self) -> Result<DeclineSummary> {
        let declines = self.declines.lock().await;
        let reconsidered_count = declines.len() as i64;

        Ok(DeclineSummary {
            reconsidered_count,
            money_saved: declines.iter().filter_map(|(_, amount)| *amount).sum(),
            co2_saved_kg: reconsidered_count as f64 * CO2_SAVED_PER_DECLINE_KG,
        })
    }
}
