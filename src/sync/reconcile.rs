//! Last-write-wins reconciliation of two item snapshots.
//!
//! Given the server's view (`remote`) and the client's view (`local`),
//! `reconcile` partitions items into the operations that bring the server in
//! line with the client:
//!
//! - **to_add**: in `local`, not in `remote`
//! - **to_delete**: in `remote`, not in `local`
//! - **to_update**: in both, and the local copy is strictly newer
//!
//! Equal timestamps keep the server copy. The profile, when the client sent
//! one, is replaced wholesale without looking at timestamps. The function is
//! pure; applying the operations is up to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{SyncItem, User};

/// One party's view of a user's items, optionally with the profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub items: Vec<SyncItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<User>,
}

impl Snapshot {
    pub fn new(items: Vec<SyncItem>) -> Self {
        Self {
            items,
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: User) -> Self {
        self.profile = Some(profile);
        self
    }

    fn index(&self) -> HashMap<Uuid, &SyncItem> {
        self.items.iter().map(|item| (item.id, item)).collect()
    }
}

/// Operations produced by one reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationSet {
    #[serde(rename = "itemsToAdd")]
    pub to_add: Vec<SyncItem>,
    #[serde(rename = "itemsToUpdate")]
    pub to_update: Vec<SyncItem>,
    #[serde(rename = "itemsToDelete")]
    pub to_delete: Vec<SyncItem>,
    /// Replace the stored profile with this one.
    #[serde(rename = "userToUpdate", default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<User>,
}

impl SyncOperationSet {
    /// True when no item operation is pending. The profile is not considered.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len()
    }
}

/// Computes the operations that bring `remote` in line with `local`.
pub fn reconcile(remote: &Snapshot, local: &Snapshot) -> SyncOperationSet {
    let remote_index = remote.index();
    let local_index = local.index();

    let mut ops = SyncOperationSet::default();

    for item in &local.items {
        match remote_index.get(&item.id) {
            None => ops.to_add.push(item.clone()),
            Some(server) if item.last_modified > server.last_modified => {
                ops.to_update.push(item.clone())
            }
            Some(_) => {}
        }
    }

    ops.to_delete = remote
        .items
        .iter()
        .filter(|item| !local_index.contains_key(&item.id))
        .cloned()
        .collect();

    ops.profile = local.profile.clone();

    ops
}
