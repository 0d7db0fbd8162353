//! Pantry synchronization.
//!
//! Clients and server each hold a list of [`SyncItem`](crate::models::SyncItem)s.
//! Sync works in two steps:
//!
//! - `hash`: both sides compute a cheap checksum to find out whether anything
//!   differs at all.
//! - `reconcile`: when it does, a last-write-wins comparison turns the two
//!   snapshots into add / update / delete operations.
//!
//! `service` ties both to the stores and applies the result.
//!
//! # Usage
//!
//! ```
//! use pantree::sync::{reconcile, Snapshot};
//!
//! let server = Snapshot::default();
//! let client = Snapshot::default();
//! assert!(reconcile(&server, &client).is_empty());
//! ```

pub mod hash;
pub mod locks;
pub mod reconcile;
pub mod service;

pub use hash::state_hash;
pub use locks::UserLocks;
pub use reconcile::{reconcile, Snapshot, SyncOperationSet};
pub use service::{SnapshotOutcome, SyncError, SyncService};
