//! Storage collaborators used by the auth and sync cores.
//!
//! The cores only see these traits. `crate::db` provides the SQLite
//! implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Identity, ProfileDefaults, ProfileUpdate, SyncItem, User};

#[cfg(test)]
pub(crate) mod memory;

/// Errors returned by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
    #[error("Item {0} belongs to another user")]
    OwnershipConflict(Uuid),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Lookup and lifecycle of user identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create(&self, email: &str, defaults: &ProfileDefaults) -> Result<User, StoreError>;

    async fn get(&self, id: Identity) -> Result<Option<User>, StoreError>;

    /// Applies the non-empty fields of `fields`.
    async fn update(&self, id: Identity, fields: &ProfileUpdate) -> Result<(), StoreError>;
}

/// Persistence of pantry items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All items of `owner` (tombstones included) in insertion order.
    async fn list_by_owner(&self, owner: Identity) -> Result<Vec<SyncItem>, StoreError>;

    /// Inserts or replaces one item. Fails with `OwnershipConflict` if the id
    /// exists under another owner.
    async fn upsert(&self, item: &SyncItem) -> Result<SyncItem, StoreError>;

    /// Items of `owner` whose `last_modified` is strictly after `since`.
    async fn list_modified_since(
        &self,
        owner: Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncItem>, StoreError>;

    /// Upserts all `items` for `owner` atomically.
    async fn apply_changes(&self, owner: Identity, items: &[SyncItem]) -> Result<(), StoreError>;
}
