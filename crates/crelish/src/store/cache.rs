//! Read-through cache of "all records of a type" for the file store.
//!
//! Per content type the entry moves through
//!
//! ```text
//! Empty ──populate──► Populated ──upsert_entry / remove_entry──► Populated
//!   ▲                                                              │
//!   └──────────────────────────── flush ◄──────────────────────────┘
//! ```
//!
//! Saves and deletes patch a populated entry in place rather than dropping
//! it, so a listing right after a write sees the write without a rescan.
//! Patching an empty entry does nothing; the next listing scans anyway.
//!
//! The cache is process-local. Another process writing the same content root
//! is only seen after a flush or once the TTL expires.

use crate::model::{Attributes, Record};
use moka::sync::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// A key/value cache with optional per-entry TTL.
pub trait CacheService<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V, ttl: Option<Duration>);
    fn delete(&self, key: &str);
    fn clear(&self);
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Option<Duration>,
}

struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry<V>, _created_at: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// In-process [`CacheService`] backed by `moka`.
pub struct MemoryCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, Entry<V>>,
}

impl<V: Clone + Send + Sync + 'static> MemoryCache<V> {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CacheService<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).map(|entry| entry.value)
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.inner.insert(key.to_string(), Entry { value, ttl });
    }

    fn delete(&self, key: &str) {
        self.inner.invalidate(key);
    }

    fn clear(&self) {
        self.inner.invalidate_all();
    }
}

/// One cached record in both of its shapes.
///
/// Filters and sorts run on `raw`; callers receive `processed`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRecord {
    pub raw: Attributes,
    pub processed: Record,
}

impl CachedRecord {
    pub fn uuid(&self) -> Option<&str> {
        self.raw.get(crate::model::UUID).and_then(|v| v.as_str())
    }
}

pub type RecordList = Arc<Vec<CachedRecord>>;

/// Record-list cache with explicit key derivation and incremental updates.
pub struct RecordCache {
    service: Arc<dyn CacheService<RecordList>>,
    ttl: Option<Duration>,
    // Serializes read-modify-write of one list against another.
    write_lock: Mutex<()>,
}

impl RecordCache {
    /// `ttl` of `None` keeps entries until flushed or evicted.
    pub fn new(service: Arc<dyn CacheService<RecordList>>, ttl: Option<Duration>) -> Self {
        Self {
            service,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(capacity: u64, ttl: Option<Duration>) -> Self {
        Self::new(Arc::new(MemoryCache::new(capacity)), ttl)
    }

    pub fn key_for(ctype: &str) -> String {
        format!("records:{}", ctype)
    }

    pub fn get(&self, ctype: &str) -> Option<RecordList> {
        self.service.get(&Self::key_for(ctype))
    }

    pub fn populate(&self, ctype: &str, records: Vec<CachedRecord>) -> RecordList {
        let list = Arc::new(records);
        let _guard = self.write_lock.lock();
        self.service
            .set(&Self::key_for(ctype), list.clone(), self.ttl);
        list
    }

    /// Replace the entry with the same uuid, or append.
    pub fn upsert_entry(&self, ctype: &str, record: CachedRecord) {
        let key = Self::key_for(ctype);
        let _guard = self.write_lock.lock();
        let Some(current) = self.service.get(&key) else {
            return;
        };
        let mut list = current.as_ref().clone();
        match list.iter().position(|r| r.uuid() == record.uuid()) {
            Some(i) => list[i] = record,
            None => list.push(record),
        }
        self.service.set(&key, Arc::new(list), self.ttl);
    }

    pub fn remove_entry(&self, ctype: &str, uuid: &str) {
        let key = Self::key_for(ctype);
        let _guard = self.write_lock.lock();
        let Some(current) = self.service.get(&key) else {
            return;
        };
        let list: Vec<CachedRecord> = current
            .iter()
            .filter(|r| r.uuid() != Some(uuid))
            .cloned()
            .collect();
        self.service.set(&key, Arc::new(list), self.ttl);
    }

    pub fn flush(&self, ctype: &str) {
        let _guard = self.write_lock.lock();
        self.service.delete(&Self::key_for(ctype));
        info!(ctype, "record cache flushed");
    }

    pub fn flush_all(&self) {
        let _guard = self.write_lock.lock();
        self.service.clear();
        info!("all record caches flushed");
    }
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache").field("ttl", &self.ttl).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cached(uuid: &str, title: &str) -> CachedRecord {
        let raw = json!({"uuid": uuid, "title": title}).as_object().cloned().unwrap();
        CachedRecord {
            processed: Record::new("event", raw.clone()),
            raw,
        }
    }

    fn titles(list: &RecordList) -> Vec<String> {
        list.iter()
            .map(|r| r.raw["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn key_derivation() {
        assert_eq!(RecordCache::key_for("event"), "records:event");
    }

    #[test]
    fn upsert_replaces_in_place_or_appends() {
        let cache = RecordCache::in_memory(16, None);
        cache.populate("event", vec![cached("a", "A"), cached("b", "B")]);

        cache.upsert_entry("event", cached("a", "A2"));
        cache.upsert_entry("event", cached("c", "C"));

        let list = cache.get("event").unwrap();
        assert_eq!(titles(&list), vec!["A2", "B", "C"]);
    }

    #[test]
    fn remove_and_flush() {
        let cache = RecordCache::in_memory(16, None);
        cache.populate("event", vec![cached("a", "A"), cached("b", "B")]);
        cache.remove_entry("event", "a");
        assert_eq!(titles(&cache.get("event").unwrap()), vec!["B"]);

        cache.flush("event");
        assert!(cache.get("event").is_none());
    }

    #[test]
    fn patching_a_cold_entry_is_a_noop() {
        let cache = RecordCache::in_memory(16, None);
        cache.upsert_entry("event", cached("a", "A"));
        assert!(cache.get("event").is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = RecordCache::in_memory(16, Some(Duration::from_millis(20)));
        cache.populate("event", vec![cached("a", "A")]);
        assert!(cache.get("event").is_some());
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("event").is_none());
    }
}
