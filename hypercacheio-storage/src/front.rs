//! L1 front cache.
//!
//! A per-process map consulted before the durable store or the remote peer.
//! It is never invalidated by remote writes: an entry lives until it is
//! overwritten or removed locally, or until its own expiration passes.

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expiration: Option<i64>,
}

/// Concurrent in-memory front cache keyed by the full (prefixed) key.
#[derive(Debug)]
pub struct FrontCache<V> {
    slots: DashMap<String, Slot<V>>,
}

impl<V: Clone> FrontCache<V> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Value for `key` unless missing or expired at `now`.
    pub fn get(&self, key: &str, now: i64) -> Option<V> {
        self.get_entry(key, now).map(|(value, _)| value)
    }

    /// Value and expiration for `key` unless missing or expired at `now`.
    pub fn get_entry(&self, key: &str, now: i64) -> Option<(V, Option<i64>)> {
        let (value, expiration) = {
            let slot = self.slots.get(key)?;
            (slot.value.clone(), slot.expiration)
        };
        match expiration {
            Some(exp) if exp < now => {
                self.slots
                    .remove_if(key, |_, slot| matches!(slot.expiration, Some(e) if e < now));
                None
            }
            _ => Some((value, expiration)),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V, expiration: Option<i64>) {
        self.slots.insert(key.into(), Slot { value, expiration });
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.slots.remove(key).map(|(_, slot)| slot.value)
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<V: Clone> Default for FrontCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
