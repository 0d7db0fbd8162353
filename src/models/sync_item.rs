use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Identity;

/// One inventory entry in a user's pantry.
///
/// `last_modified` is the only input to conflict resolution. Whichever side
/// performs a mutation stamps it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub owner: Identity,
    #[serde(default)]
    pub ingredient_id: Option<Uuid>,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
}

impl SyncItem {
    pub fn new(owner: Identity, quantity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            ingredient_id: None,
            quantity,
            price: None,
            expiration: None,
            last_modified: Utc::now(),
            deleted: false,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_ingredient(mut self, ingredient_id: Uuid) -> Self {
        self.ingredient_id = Some(ingredient_id);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }

    /// Returns a tombstoned copy stamped with `at`.
    pub fn tombstone(&self, at: DateTime<Utc>) -> Self {
        Self {
            deleted: true,
            last_modified: at,
            ..self.clone()
        }
    }
}
