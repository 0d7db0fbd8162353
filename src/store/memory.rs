//! In-memory stores for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{IdentityStore, ItemStore, StoreError};
use crate::models::{Identity, ProfileDefaults, ProfileUpdate, SyncItem, User};

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    users: Mutex<Vec<User>>,
    pub fail: AtomicBool,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::NotFound("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn create(&self, email: &str, defaults: &ProfileDefaults) -> Result<User, StoreError> {
        self.check()?;
        let user = User::new(email, defaults);
        self.users.lock().unwrap().push(user.clone());
        Ok(user)
    }

    async fn get(&self, id: Identity) -> Result<Option<User>, StoreError> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn update(&self, id: Identity, fields: &ProfileUpdate) -> Result<(), StoreError> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(email) = &fields.email {
            user.email = email.clone();
        }
        if let Some(name) = &fields.name {
            user.name = name.clone();
        }
        if let Some(pref) = fields.pref_measure {
            user.pref_measure = pref;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<Vec<SyncItem>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(items: &mut Vec<SyncItem>, item: &SyncItem) -> Result<(), StoreError> {
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) if existing.owner != item.owner => {
                Err(StoreError::OwnershipConflict(item.id))
            }
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => {
                items.push(item.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list_by_owner(&self, owner: Identity) -> Result<Vec<SyncItem>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().filter(|i| i.owner == owner).cloned().collect())
    }

    async fn upsert(&self, item: &SyncItem) -> Result<SyncItem, StoreError> {
        Self::put(&mut self.items.lock().unwrap(), item)?;
        Ok(item.clone())
    }

    async fn list_modified_since(
        &self,
        owner: Identity,
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncItem>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|i| i.owner == owner && i.last_modified > since)
            .cloned()
            .collect())
    }

    async fn apply_changes(&self, owner: Identity, items: &[SyncItem]) -> Result<(), StoreError> {
        let mut guard = self.items.lock().unwrap();
        let mut staged = guard.clone();
        for item in items {
            if item.owner != owner {
                return Err(StoreError::OwnershipConflict(item.id));
            }
            Self::put(&mut staged, item)?;
        }
        *guard = staged;
        Ok(())
    }
}
