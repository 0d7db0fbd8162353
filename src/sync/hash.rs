//! Cheap "did anything change" checksum over a set of items.
//!
//! Folds each item's id and modification time through 32-bit FNV-1a. The
//! result depends on the order of the input: callers hash items in the order
//! the store returns them (insertion order). It is not a content fingerprint
//! and carries no security guarantee.

use crate::models::SyncItem;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a32(mut hash: u32, bytes: &[u8]) -> u32 {
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hash of `(id, last_modified_ms)` for each item, in the given order.
pub fn state_hash<'a, I>(items: I) -> u32
where
    I: IntoIterator<Item = &'a SyncItem>,
{
    items.into_iter().fold(FNV_OFFSET_BASIS, |hash, item| {
        let hash = fnv1a32(hash, item.id.as_bytes());
        fnv1a32(hash, &item.last_modified.timestamp_millis().to_be_bytes())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn item(id: &str, millis: i64) -> SyncItem {
        SyncItem::new(Identity::new(), 1.0)
            .with_id(Uuid::parse_str(id).unwrap())
            .with_last_modified(Utc.timestamp_millis_opt(millis).unwrap())
    }

    #[test]
    fn test_fnv1a_reference_vectors() {
        assert_eq!(fnv1a32(FNV_OFFSET_BASIS, b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(FNV_OFFSET_BASIS, b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(FNV_OFFSET_BASIS, b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_empty_state() {
        assert_eq!(state_hash(&Vec::<SyncItem>::new()), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_deterministic() {
        let items = vec![
            item("11111111-1111-1111-1111-111111111111", 100),
            item("22222222-2222-2222-2222-222222222222", 50),
        ];
        assert_eq!(state_hash(&items), state_hash(&items.clone()));
    }

    #[test]
    fn test_matches_byte_layout() {
        let it = item("11111111-1111-1111-1111-111111111111", 100);
        let mut bytes = it.id.as_bytes().to_vec();
        bytes.extend_from_slice(&100i64.to_be_bytes());

        assert_eq!(state_hash([&it]), fnv1a32(FNV_OFFSET_BASIS, &bytes));
    }

    #[test]
    fn test_ignores_other_fields() {
        let a = item("11111111-1111-1111-1111-111111111111", 100);
        let mut b = a.clone();
        b.quantity = 42.0;
        b.owner = Identity::new();

        assert_eq!(state_hash([&a]), state_hash([&b]));
    }

    #[test]
    fn test_detects_modification() {
        let a = item("11111111-1111-1111-1111-111111111111", 100);
        let b = item("11111111-1111-1111-1111-111111111111", 101);
        assert_ne!(state_hash([&a]), state_hash([&b]));
    }

    #[test]
    fn test_order_sensitive() {
        let one = item("11111111-1111-1111-1111-111111111111", 100);
        let two = item("22222222-2222-2222-2222-222222222222", 50);

        let forward = state_hash([&one, &two]);
        let backward = state_hash([&two, &one]);

        assert_ne!(forward, backward);
    }
}
