//! Server-side sync operations for one user's pantry.
//!
//! Wraps the pure reconciler with storage: read the server state, reconcile
//! against what the client sent, and write the outcome back. Each user's
//! pushes are serialized through [`UserLocks`] and applied in one store
//! transaction.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::hash::state_hash;
use super::locks::UserLocks;
use super::reconcile::{reconcile, Snapshot, SyncOperationSet};
use crate::auth::{normalize_email, Clock};
use crate::models::{Identity, ProfileUpdate, SyncItem, User};
use crate::store::{IdentityStore, ItemStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Item {0} does not belong to the authenticated user")]
    ForeignItem(Uuid),
    #[error("Item {0} appears more than once in the request")]
    DuplicateItem(Uuid),
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),
    #[error("Unable to compute sync state hash: {0}")]
    IntegrityComputationFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a full snapshot push.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOutcome {
    /// Operations that were written to the store.
    pub applied: SyncOperationSet,
    /// Server copies the client lacks or holds an older version of.
    pub changes: Vec<SyncItem>,
    /// State hash after the push.
    pub hash: u32,
}

pub struct SyncService {
    items: Arc<dyn ItemStore>,
    identities: Arc<dyn IdentityStore>,
    locks: UserLocks,
    clock: Arc<dyn Clock>,
}

impl SyncService {
    pub fn new(
        items: Arc<dyn ItemStore>,
        identities: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            items,
            identities,
            locks: UserLocks::new(),
            clock,
        }
    }

    /// Loads the stored items and profile of `owner`.
    pub async fn read_state(&self, owner: Identity) -> Result<Snapshot, SyncError> {
        let items = self.items.list_by_owner(owner).await?;
        let profile = self.identities.get(owner).await?;
        Ok(Snapshot { items, profile })
    }

    /// State hash of everything stored for `owner`.
    pub async fn state_hash(&self, owner: Identity) -> Result<u32, SyncError> {
        let items = self.items.list_by_owner(owner).await.map_err(|e| match e {
            StoreError::InvalidRow(msg) => SyncError::IntegrityComputationFailed(msg),
            other => SyncError::Store(other),
        })?;
        Ok(state_hash(&items))
    }

    /// Merges a batch of changed items into the store and returns every item
    /// of `owner` modified after `since`.
    ///
    /// Items missing from the batch are left alone. A pushed item replaces
    /// the stored copy only if it is strictly newer.
    pub async fn push_changes(
        &self,
        owner: Identity,
        items: Vec<SyncItem>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncItem>, SyncError> {
        validate(owner, &items)?;

        let _guard = self.locks.lock(owner).await;

        let pushed: HashSet<Uuid> = items.iter().map(|i| i.id).collect();
        let stored = self
            .items
            .list_by_owner(owner)
            .await?
            .into_iter()
            .filter(|i| pushed.contains(&i.id))
            .collect();

        let ops = reconcile(&Snapshot::new(stored), &Snapshot::new(items));
        let writes: Vec<SyncItem> = ops.to_add.into_iter().chain(ops.to_update).collect();
        if !writes.is_empty() {
            self.items.apply_changes(owner, &writes).await?;
        }
        tracing::debug!(user = %owner, written = writes.len(), "applied delta push");

        let since = since.unwrap_or_else(epoch);
        Ok(self.items.list_modified_since(owner, since).await?)
    }

    /// Reconciles the client's full state against the server's and applies
    /// the result.
    ///
    /// Server items missing from the client are tombstoned, unless they were
    /// modified after `last_sync`: the client simply has not seen those yet,
    /// so they are returned in `changes` instead. Server copies that won
    /// over the client's copy are returned in `changes` too.
    pub async fn push_snapshot(
        &self,
        owner: Identity,
        mut local: Snapshot,
        last_sync: Option<DateTime<Utc>>,
    ) -> Result<SnapshotOutcome, SyncError> {
        validate(owner, &local.items)?;
        if let Some(profile) = local.profile.as_mut() {
            profile.email = normalize_email(&profile.email)
                .map_err(|e| SyncError::InvalidProfile(e.to_string()))?;
        }

        let _guard = self.locks.lock(owner).await;

        let remote = self.read_state(owner).await?;
        let ops = reconcile(&remote, &local);

        let now = Utc
            .timestamp_millis_opt(self.clock.now_millis())
            .single()
            .unwrap_or_else(Utc::now);
        let seen = |item: &SyncItem| last_sync.map_or(true, |t| item.last_modified <= t);

        let to_delete: Vec<SyncItem> = ops
            .to_delete
            .into_iter()
            .filter(|item| !item.deleted && seen(item))
            .map(|item| item.tombstone(now))
            .collect();

        let writes: Vec<SyncItem> = ops
            .to_add
            .iter()
            .chain(&ops.to_update)
            .chain(&to_delete)
            .cloned()
            .collect();
        if !writes.is_empty() {
            self.items.apply_changes(owner, &writes).await?;
        }

        let profile = match ops.profile {
            Some(profile) => Some(self.replace_profile(owner, profile).await?),
            None => None,
        };

        let applied = SyncOperationSet {
            to_add: ops.to_add,
            to_update: ops.to_update,
            to_delete,
            profile,
        };

        let written: HashSet<Uuid> = applied
            .to_add
            .iter()
            .chain(&applied.to_update)
            .chain(&applied.to_delete)
            .map(|i| i.id)
            .collect();
        let held: HashMap<Uuid, DateTime<Utc>> = local
            .items
            .iter()
            .map(|i| (i.id, i.last_modified))
            .collect();
        let stored = self.items.list_by_owner(owner).await?;
        let changes = stored
            .iter()
            .filter(|item| !written.contains(&item.id))
            .filter(|item| match held.get(&item.id) {
                Some(local_modified) => item.last_modified > *local_modified || !seen(*item),
                None => !seen(*item),
            })
            .cloned()
            .collect();
        let hash = state_hash(&stored);

        tracing::info!(
            user = %owner,
            added = applied.to_add.len(),
            updated = applied.to_update.len(),
            deleted = applied.to_delete.len(),
            hash,
            "applied snapshot push"
        );

        Ok(SnapshotOutcome {
            applied,
            changes,
            hash,
        })
    }

    /// Forgets per-user locks nobody is waiting on.
    pub async fn prune_locks(&self) -> usize {
        self.locks.prune().await
    }

    async fn replace_profile(&self, owner: Identity, profile: User) -> Result<User, SyncError> {
        self.identities
            .update(owner, &ProfileUpdate::from(&profile))
            .await?;
        self.identities
            .get(owner)
            .await?
            .ok_or_else(|| SyncError::Store(StoreError::NotFound(owner.to_string())))
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

fn validate(owner: Identity, items: &[SyncItem]) -> Result<(), SyncError> {
    let mut ids = HashSet::with_capacity(items.len());
    for item in items {
        if item.owner != owner {
            return Err(SyncError::ForeignItem(item.id));
        }
        if !ids.insert(item.id) {
            return Err(SyncError::DuplicateItem(item.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ManualClock;
    use crate::models::ProfileDefaults;
    use crate::store::memory::{MemoryIdentityStore, MemoryItemStore};

    const NOW: i64 = 1_700_000_000_000;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    struct Fixture {
        service: SyncService,
        items: Arc<MemoryItemStore>,
        identities: Arc<MemoryIdentityStore>,
        owner: Identity,
    }

    async fn fixture() -> Fixture {
        let items = Arc::new(MemoryItemStore::new());
        let identities = Arc::new(MemoryIdentityStore::new());
        let user = identities
            .create("cook@example.com", &ProfileDefaults::default())
            .await
            .unwrap();
        let service = SyncService::new(
            items.clone(),
            identities.clone(),
            Arc::new(ManualClock::new(NOW)),
        );
        Fixture {
            service,
            items,
            identities,
            owner: user.id,
        }
    }

    fn item(owner: Identity, n: u8, millis: i64) -> SyncItem {
        SyncItem::new(owner, 1.0)
            .with_id(Uuid::from_bytes([n; 16]))
            .with_last_modified(at(millis))
    }

    #[tokio::test]
    async fn test_read_state_includes_profile() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();

        let state = f.service.read_state(f.owner).await.unwrap();

        assert_eq!(state.items.len(), 1);
        assert_eq!(state.profile.unwrap().email, "cook@example.com");
    }

    #[tokio::test]
    async fn test_state_hash_of_empty_pantry() {
        let f = fixture().await;
        let expected = state_hash(&Vec::<SyncItem>::new());
        assert_eq!(f.service.state_hash(f.owner).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_state_hash_tracks_store() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();
        let before = f.service.state_hash(f.owner).await.unwrap();

        f.items.upsert(&item(f.owner, 1, 200)).await.unwrap();
        let after = f.service.state_hash(f.owner).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(after, state_hash(&[item(f.owner, 1, 200)]));
    }

    #[tokio::test]
    async fn test_push_changes_adds_and_returns_since() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 9, 50)).await.unwrap();

        let returned = f
            .service
            .push_changes(f.owner, vec![item(f.owner, 1, 300)], Some(at(100)))
            .await
            .unwrap();

        assert_eq!(returned, vec![item(f.owner, 1, 300)]);
        assert_eq!(f.items.list_by_owner(f.owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_push_changes_keeps_newer_server_copy() {
        let f = fixture().await;
        let mut server = item(f.owner, 1, 500);
        server.quantity = 7.0;
        f.items.upsert(&server).await.unwrap();

        f.service
            .push_changes(f.owner, vec![item(f.owner, 1, 400)], None)
            .await
            .unwrap();

        let stored = f.items.list_by_owner(f.owner).await.unwrap();
        assert_eq!(stored, vec![server]);
    }

    #[tokio::test]
    async fn test_push_changes_never_deletes() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();

        f.service
            .push_changes(f.owner, Vec::new(), None)
            .await
            .unwrap();

        let stored = f.items.list_by_owner(f.owner).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].deleted);
    }

    #[tokio::test]
    async fn test_push_rejects_foreign_item() {
        let f = fixture().await;
        let stranger = Identity::new();

        let err = f
            .service
            .push_changes(f.owner, vec![item(stranger, 1, 1)], None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::ForeignItem(_)));
    }

    #[tokio::test]
    async fn test_push_rejects_duplicate_ids() {
        let f = fixture().await;

        let err = f
            .service
            .push_snapshot(
                f.owner,
                Snapshot::new(vec![item(f.owner, 1, 1), item(f.owner, 1, 2)]),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DuplicateItem(_)));
    }

    #[tokio::test]
    async fn test_snapshot_adds_missing_item() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();

        let outcome = f
            .service
            .push_snapshot(
                f.owner,
                Snapshot::new(vec![item(f.owner, 1, 100), item(f.owner, 2, 50)]),
                Some(at(100)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.applied.to_add, vec![item(f.owner, 2, 50)]);
        assert!(outcome.applied.to_update.is_empty());
        assert!(outcome.applied.to_delete.is_empty());
        assert!(outcome.changes.is_empty());

        let stored = f.items.list_by_owner(f.owner).await.unwrap();
        assert_eq!(outcome.hash, state_hash(&stored));
    }

    #[tokio::test]
    async fn test_snapshot_tombstones_seen_items() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();

        let outcome = f
            .service
            .push_snapshot(f.owner, Snapshot::default(), Some(at(200)))
            .await
            .unwrap();

        assert_eq!(outcome.applied.to_delete.len(), 1);
        let stored = f.items.list_by_owner(f.owner).await.unwrap();
        assert!(stored[0].deleted);
        assert_eq!(stored[0].last_modified, at(NOW));
    }

    #[tokio::test]
    async fn test_snapshot_withholds_unseen_deletions() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 300)).await.unwrap();

        let outcome = f
            .service
            .push_snapshot(f.owner, Snapshot::default(), Some(at(200)))
            .await
            .unwrap();

        assert!(outcome.applied.to_delete.is_empty());
        assert_eq!(outcome.changes, vec![item(f.owner, 1, 300)]);
        assert!(!f.items.list_by_owner(f.owner).await.unwrap()[0].deleted);
    }

    #[tokio::test]
    async fn test_snapshot_skips_existing_tombstones() {
        let f = fixture().await;
        f.items
            .upsert(&item(f.owner, 1, 100).tombstone(at(150)))
            .await
            .unwrap();

        let outcome = f
            .service
            .push_snapshot(f.owner, Snapshot::default(), None)
            .await
            .unwrap();

        assert!(outcome.applied.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_replaces_profile() {
        let f = fixture().await;
        let mut profile = f.identities.get(f.owner).await.unwrap().unwrap();
        profile.name = "Head Chef".to_string();

        let outcome = f
            .service
            .push_snapshot(f.owner, Snapshot::default().with_profile(profile), None)
            .await
            .unwrap();

        assert_eq!(outcome.applied.profile.unwrap().name, "Head Chef");
        let stored = f.identities.get(f.owner).await.unwrap().unwrap();
        assert_eq!(stored.name, "Head Chef");
    }

    #[tokio::test]
    async fn test_snapshot_returns_newer_server_copy_of_held_item() {
        let f = fixture().await;
        f.service
            .push_changes(f.owner, vec![item(f.owner, 1, 300)], None)
            .await
            .unwrap();

        let outcome = f
            .service
            .push_snapshot(
                f.owner,
                Snapshot::new(vec![item(f.owner, 1, 100)]),
                Some(at(200)),
            )
            .await
            .unwrap();

        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.changes, vec![item(f.owner, 1, 300)]);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_echo_applied_updates() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();

        let outcome = f
            .service
            .push_snapshot(
                f.owner,
                Snapshot::new(vec![item(f.owner, 1, 400)]),
                Some(at(200)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.applied.to_update, vec![item(f.owner, 1, 400)]);
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_normalizes_profile_email() {
        let f = fixture().await;
        let mut profile = f.identities.get(f.owner).await.unwrap().unwrap();
        profile.email = "  Cook@Example.COM".to_string();

        let outcome = f
            .service
            .push_snapshot(f.owner, Snapshot::default().with_profile(profile), None)
            .await
            .unwrap();

        assert_eq!(outcome.applied.profile.unwrap().email, "cook@example.com");
        let found = f.identities.find_by_email("cook@example.com").await.unwrap();
        assert_eq!(found.unwrap().id, f.owner);
    }

    #[tokio::test]
    async fn test_snapshot_rejects_invalid_profile_email() {
        let f = fixture().await;
        f.items.upsert(&item(f.owner, 1, 100)).await.unwrap();
        let mut profile = f.identities.get(f.owner).await.unwrap().unwrap();
        profile.email = "not-an-email".to_string();

        let err = f
            .service
            .push_snapshot(f.owner, Snapshot::default().with_profile(profile), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidProfile(_)));
        assert!(!f.items.list_by_owner(f.owner).await.unwrap()[0].deleted);
        let stored = f.identities.get(f.owner).await.unwrap().unwrap();
        assert_eq!(stored.email, "cook@example.com");
    }

    #[tokio::test]
    async fn test_concurrent_pushes_all_land() {
        let f = fixture().await;
        let service = Arc::new(f.service);

        let mut handles = Vec::new();
        for n in 1..=8u8 {
            let service = service.clone();
            let owner = f.owner;
            handles.push(tokio::spawn(async move {
                service
                    .push_changes(owner, vec![item(owner, n, i64::from(n))], None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.items.list_by_owner(f.owner).await.unwrap().len(), 8);
    }
}
