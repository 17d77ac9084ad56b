//! In-memory store, the default when options carry no persistence.
//!
//! State does not survive the process; QoS guarantees consequently hold
//! only within a single connection.

use super::{Store, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn open(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn close(&self) {}

    fn reset(&self) -> Result<(), StoreError> {
        self.records.lock().clear();
        Ok(())
    }

    fn put(&self, key: &str, frame: &[u8]) -> Result<(), StoreError> {
        self.records.lock().insert(key.to_string(), frame.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn del(&self, key: &str) -> Result<(), StoreError> {
        self.records.lock().remove(key);
        Ok(())
    }

    fn all(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::outbound_key;

    #[test]
    fn test_put_get_del() {
        let store = MemoryStore::new();
        let key = outbound_key(3);
        store.put(&key, b"frame").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some(&b"frame"[..]));
        store.del(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let store = MemoryStore::new();
        store.put("o:1", b"a").unwrap();
        store.put("i:2", b"b").unwrap();
        store.reset().unwrap();
        assert!(store.all().unwrap().is_empty());
    }
}
