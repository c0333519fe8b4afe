use std::str::FromStr;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::OrderMetadataRow;
use crate::error::Result;

/// Per-user metadata attached to marketplace orders, kept locally because the
/// marketplace has nowhere to store it.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if needed) the SQLite file at `db_path` and apply migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self::from_pool(pool).await?;
        info!("Order metadata store ready at {db_path}");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn set(&self, username: &str, order_id: &str, metadata: &Value) -> Result<()> {
        let encoded = serde_json::to_string(metadata)?;
        sqlx::query(
            r#"
            INSERT INTO order_metadata (username, order_id, metadata, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (username, order_id)
            DO UPDATE SET metadata = excluded.metadata, updated_at = excluded.updated_at
            "#,
        )
        .bind(username)
        .bind(order_id)
        .bind(encoded)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, username: &str, order_id: &str) -> Result<Option<Value>> {
        let row: Option<OrderMetadataRow> = sqlx::query_as(
            "SELECT username, order_id, metadata, updated_at FROM order_metadata WHERE username = ? AND order_id = ?",
        )
        .bind(username)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(decode))
    }

    /// All metadata for one user, keyed by order id.
    pub async fn list(&self, username: &str) -> Result<Map<String, Value>> {
        let rows: Vec<OrderMetadataRow> = sqlx::query_as(
            "SELECT username, order_id, metadata, updated_at FROM order_metadata WHERE username = ? ORDER BY order_id",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Map::new();
        for row in rows {
            let order_id = row.order_id.clone();
            if let Some(value) = decode(row) {
                out.insert(order_id, value);
            }
        }
        Ok(out)
    }

    /// Returns true if an entry was removed.
    pub async fn delete(&self, username: &str, order_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM order_metadata WHERE username = ? AND order_id = ?")
            .bind(username)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Returns the number of entries removed.
    pub async fn delete_all(&self, username: &str) -> Result<u64> {
        let done = sqlx::query("DELETE FROM order_metadata WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

fn decode(row: OrderMetadataRow) -> Option<Value> {
    match serde_json::from_str(&row.metadata) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(
                "[METADATA] corrupt entry {}/{} (updated_at={}): {e}",
                row.username, row.order_id, row.updated_at
            );
            None
        }
    }
}
