//! Optional record of OTP digests that have already been redeemed.
//!
//! Without it a valid code can be replayed until its window closes. Entries
//! are kept in memory and expire with the window, so nothing about an OTP is
//! persisted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// In-memory set of consumed `(email, digest)` pairs with expiry.
///
/// Thread-safe via internal RwLock.
#[derive(Debug, Default)]
pub struct ConsumedOtpLedger {
    /// Expiry (epoch millis) indexed by `email:digest_hex`.
    entries: RwLock<HashMap<String, i64>>,
}

impl ConsumedOtpLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(email: &str, digest_hex: &str) -> String {
        format!("{}:{}", email, digest_hex.to_ascii_lowercase())
    }

    /// Marks the pair as used until `expires_at_ms`.
    ///
    /// Returns `false` if the pair was already consumed and has not expired.
    pub fn consume(&self, email: &str, digest_hex: &str, now_ms: i64, expires_at_ms: i64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let key = Self::key(email, digest_hex);

        if let Some(&expiry) = entries.get(&key) {
            if expiry > now_ms {
                return false;
            }
        }

        entries.insert(key, expires_at_ms);
        true
    }

    /// Removes all expired entries.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
