use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::user_repo::millis_to_datetime;
use crate::models::{Identity, SyncItem};
use crate::store::{ItemStore, StoreError};

/// `ItemStore` backed by the `user_items` table.
///
/// Items are returned in insertion order (`rowid`). Updates happen in place,
/// so an item keeps its position after it is modified.
#[derive(Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    user_id: String,
    ingredient_id: Option<String>,
    quantity: f64,
    price: Option<f64>,
    expiration_ms: Option<i64>,
    last_modified_ms: i64,
    deleted: bool,
}

const UPSERT_SQL: &str = r#"
    INSERT INTO user_items (id, user_id, ingredient_id, quantity, price, expiration_ms, last_modified_ms, deleted)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        ingredient_id = excluded.ingredient_id,
        quantity = excluded.quantity,
        price = excluded.price,
        expiration_ms = excluded.expiration_ms,
        last_modified_ms = excluded.last_modified_ms,
        deleted = excluded.deleted
    WHERE user_items.user_id = excluded.user_id
"#;

impl SqliteItemStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, item: &SyncItem) -> Result<(), StoreError> {
        let result = sqlx::query(UPSERT_SQL)
            .bind(item.id.to_string())
            .bind(item.owner.to_string())
            .bind(item.ingredient_id.map(|id| id.to_string()))
            .bind(item.quantity)
            .bind(item.price)
            .bind(item.expiration.map(|e| e.timestamp_millis()))
            .bind(item.last_modified.timestamp_millis())
            .bind(item.deleted)
            .execute(&mut **tx)
            .await?;

        // The WHERE clause suppresses updates of another user's row.
        if result.rows_affected() == 0 {
            return Err(StoreError::OwnershipConflict(item.id));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SyncItem>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as("SELECT * FROM user_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(hydrate_item).transpose()
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn list_by_owner(&self, owner: Identity) -> Result<Vec<SyncItem>, StoreError> {
        let rows: Vec<ItemRow> =
            sqlx::query_as("SELECT * FROM user_items WHERE user_id = ? ORDER BY rowid")
                .bind(owner.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(hydrate_item).collect()
    }

    async fn upsert(&self, item: &SyncItem) -> Result<SyncItem, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_in(&mut tx, item).await?;
        tx.commit().await?;

        self.get_by_id(item.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(item.id.to_string()))
    }

    async fn list_modified_since(
        &self,
        owner: Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncItem>, StoreError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT * FROM user_items WHERE user_id = ? AND last_modified_ms > ? ORDER BY rowid",
        )
        .bind(owner.to_string())
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(hydrate_item).collect()
    }

    async fn apply_changes(&self, owner: Identity, items: &[SyncItem]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            if item.owner != owner {
                return Err(StoreError::OwnershipConflict(item.id));
            }
            Self::upsert_in(&mut tx, item).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::InvalidRow(format!("{} '{}': {}", field, value, e)))
}

fn hydrate_item(row: ItemRow) -> Result<SyncItem, StoreError> {
    Ok(SyncItem {
        id: parse_uuid("id", &row.id)?,
        owner: Identity::from_uuid(parse_uuid("user_id", &row.user_id)?),
        ingredient_id: row
            .ingredient_id
            .as_deref()
            .map(|v| parse_uuid("ingredient_id", v))
            .transpose()?,
        quantity: row.quantity,
        price: row.price,
        expiration: row.expiration_ms.map(millis_to_datetime).transpose()?,
        last_modified: millis_to_datetime(row.last_modified_ms)?,
        deleted: row.deleted,
    })
}
