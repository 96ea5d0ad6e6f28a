//! Durable gate records and decline statistics in SQLite

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::info;

use crate::models::{DeclineSummary, GateState, ProductKey};
use crate::traits::{GateStore, StatisticsStore};

/// Estimated CO2 saved per skipped purchase
pub const CO2_SAVED_PER_DECLINE_KG: f64 = 2.5;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(parent) = db_url
            .strip_prefix("sqlite:")
            .map(|path| path.trim_start_matches("//"))
            .filter(|path| !path.starts_with(':'))
            .and_then(|path| std::path::Path::new(path).parent())
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// Private database living as long as the returned handle
    pub async fn in_memory() -> Result<Self> {
        // A single connection so every query sees the same memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }
}

#[async_trait]
impl GateStore for Database {
    async fn get(&self, key: &str) -> Result<Option<GateState>> {
        let row = sqlx::query("SELECT state FROM gate_states WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.get::<String, _>("state").parse::<GateState>())
            .transpose()
    }

    async fn set(&self, key: &str, state: GateState) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO gate_states (key, state, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(state.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM gate_states WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM gate_states WHERE substr(key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StatisticsStore for Database {
    async fn record_decline(&self, product: &ProductKey, amount: Option<f64>) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO declines (product_key, amount, declined_at)
            VALUES (?, ?, ?)
            ",
        )
        .bind(product.as_str())
        .bind(amount)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn summary(&self) -> Result<DeclineSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS declined, COALESCE(SUM(amount), 0.0) AS saved FROM declines",
        )
        .fetch_one(&self.pool)
        .await?;

        let reconsidered_count = row.get::<i64, _>("declined");
        Ok(DeclineSummary {
            reconsidered_count,
            money_saved: row.get::<f64, _>("saved"),
            co2_saved_kg: reconsidered_count as f64 * CO2_SAVED_PER_DECLINE_KG,
        })
    }
}
