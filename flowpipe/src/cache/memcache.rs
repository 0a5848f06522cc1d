//! In-memory implementation of CacheStore

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::types::{CacheError, CacheStore};
use crate::unit::pack;

struct Entry {
    packed: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory implementation of CacheStore
///
/// Namespaces are independent maps. Entries past their TTL read as absent
/// and are evicted on access.
pub struct MemCache {
    namespaces: Mutex<HashMap<String, HashMap<String, Entry>>>,
}

impl MemCache {
    /// Create a new empty MemCache store
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Store already packed text as is
    ///
    /// Nothing checks that `packed` decodes; `get` reads undecodable text
    /// as `None`.
    pub fn set_packed(
        &self,
        namespace: &str,
        key: &str,
        packed: impl Into<String>,
        ttl: Option<Duration>,
    ) {
        let entry = Entry {
            packed: packed.into(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }

    /// Packed text of a live entry
    #[must_use]
    pub fn get_packed(&self, namespace: &str, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut namespaces = self.namespaces.lock();
        let entries = namespaces.get_mut(namespace)?;
        if entries.get(key)?.is_expired(now) {
            log::debug!("memcache: evict expired {namespace}/{key}");
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.packed.clone())
    }

    /// Number of live entries in a namespace
    #[must_use]
    pub fn len(&self, namespace: &str) -> usize {
        self.keys(namespace).len()
    }

    #[must_use]
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Sorted keys of live entries in a namespace
    #[must_use]
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let now = Instant::now();
        let namespaces = self.namespaces.lock();
        let Some(entries) = namespaces.get(namespace) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Clear all namespaces
    pub fn clear(&self) {
        self.namespaces.lock().clear();
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let Some(packed) = self.get_packed(namespace, key) else {
            return Ok(None);
        };
        match serde_json::from_str(&packed) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::debug!("memcache: undecodable value at {namespace}/{key}: {e}");
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let packed = pack(value).ok_or_else(|| CacheError::Unpackable {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })?;
        self.set_packed(namespace, key, packed, ttl);
        Ok(())
    }
}
