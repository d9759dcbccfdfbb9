//! In-process TTL cache used for generated SQL and query results.
//!
//! A single mutex guards the map and its access order. Expired entries are
//! dropped on read and swept on every insert; past `max_entries` the least
//! recently used entry is evicted.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entries<V> {
    map: HashMap<String, (Instant, V)>,
    /// Most recently used at the front
    access_order: VecDeque<String>,
}

impl<V> Entries<V> {
    fn touch(&mut self, key: &str) {
        self.forget(key);
        self.access_order.push_front(key.to_string());
    }

    fn forget(&mut self, key: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
    }

    fn remove(&mut self, key: &str) {
        self.map.remove(key);
        self.forget(key);
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, (expires_at, _)| *expires_at > now);
        let map = &self.map;
        self.access_order.retain(|k| map.contains_key(k));
        before - self.map.len()
    }
}

pub struct TtlCache<V> {
    namespace: &'static str,
    enabled: bool,
    max_entries: usize,
    entries: Mutex<Entries<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(namespace: &'static str, max_entries: usize) -> Self {
        Self {
            namespace,
            enabled: true,
            max_entries: max_entries.max(1),
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                access_order: VecDeque::new(),
            }),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled(namespace: &'static str) -> Self {
        Self {
            enabled: false,
            ..Self::new(namespace, 1)
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().ok()?;
        let value = match entries.map.get(key) {
            Some((expires_at, _)) if *expires_at <= now => None,
            Some((_, value)) => Some(value.clone()),
            None => return None,
        };
        match value {
            Some(value) => {
                entries.touch(key);
                Some(value)
            }
            None => {
                entries.remove(key);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let key = key.into();
        let now = Instant::now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                tracing::warn!(namespace = self.namespace, "cache lock poisoned; skipping write");
                return;
            }
        };

        let purged = entries.purge_expired(now);
        let mut evicted = 0;
        while !entries.map.contains_key(&key) && entries.map.len() >= self.max_entries {
            match entries.access_order.pop_back() {
                Some(oldest) => {
                    entries.map.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        if purged + evicted > 0 {
            tracing::debug!(namespace = self.namespace, purged, evicted, "cache entries dropped");
        }

        entries.map.insert(key.clone(), (now + ttl, value));
        entries.touch(&key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 over the canonical JSON form of `value`.
///
/// Object keys are emitted in sorted order, so logically equal values always
/// hash the same regardless of field order.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let canonical = serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase, trim and collapse whitespace.
pub fn normalize_question(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}
