use crate::shared::dns::RecordType;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time;

/// Sentinel ttl marking pinned cache entries (static `address` records).
/// Pinned entries survive [ResponseCache::purge_dynamic] and are never
/// chosen as eviction victims.
pub const PINNED_TTL: u32 = 2_147_483_647;

/// Default ttl applied when a response carries no A records to derive
/// a ttl from.
pub const DEFAULT_CACHE_TTL: u32 = 900;

/// Cache keys pair the canonical query name with the query type.
pub type CacheKey = (String, RecordType);

#[derive(Debug, Clone)]
struct CacheEntry {
    wire: Vec<u8>,
    ttl: u32,
    deadline: time::Instant,
    last_access: time::Instant,
}

/// A bounded map of `(name, qtype)` to encoded dns responses with their
/// expiry deadline. Eviction at capacity is time-aware LRU: an already
/// expired entry is evicted first, then the least recently used dynamic
/// entry. Expired entries are also dropped when a `get` touches them.
///
/// The map is wrapped in a mutex: the cache is shared between the
/// forwarder workers and the reconciler, and every operation is a short
/// critical section over O(1) map accesses (eviction scans aside).
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    default_ttl: u32,
}

impl ResponseCache {
    pub fn new(capacity: usize, default_ttl: u32) -> ResponseCache {
        ResponseCache {
            entries: Mutex::new(HashMap::new()),
            capacity,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    /// Return the cached response for the key, if present and not expired.
    /// Expired entries are evicted on access. A hit refreshes the entry
    /// recency.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = match entries.get_mut(key) {
            None => return None,
            Some(entry) => entry,
        };
        if entry.deadline <= time::Instant::now() {
            entries.remove(key);
            return None;
        }
        entry.last_access = time::Instant::now();
        Some(entry.wire.clone())
    }

    /// Cache a response under the key for `ttl` seconds, overwriting any
    /// previous entry. Passing [PINNED_TTL] pins the entry. A cache
    /// created with capacity 0 stores nothing.
    pub fn put(&self, key: CacheKey, wire: Vec<u8>, ttl: u32) {
        if self.capacity == 0 {
            return;
        }
        let now = time::Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            evict_one(&mut entries, now);
        }
        let entry = CacheEntry {
            wire,
            ttl,
            deadline: now + time::Duration::from_secs(ttl as u64),
            last_access: now,
        };
        entries.insert(key, entry);
    }

    /// Remove the entry at the given key, reporting whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Remove every entry except the pinned ones.
    pub fn purge_dynamic(&self) {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.ttl == PINNED_TTL);
        log::info!("Cache purged, {} dynamic entries removed.", before - entries.len());
    }

    /// The ttl the entry was cached with, if present. Expiry is not checked.
    pub fn ttl_of(&self, key: &CacheKey) -> Option<u32> {
        self.entries.lock().unwrap().get(key).map(|entry| entry.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Free one slot: prefer an entry already past its deadline, else the least
// recently used dynamic entry. Pinned entries are never victims; a cache
// full of pinned entries grows past capacity instead of failing the put.
fn evict_one(entries: &mut HashMap<CacheKey, CacheEntry>, now: time::Instant) {
    let expired = entries
        .iter()
        .find(|(_, entry)| entry.deadline <= now)
        .map(|(key, _)| key.clone());
    if let Some(key) = expired {
        entries.remove(&key);
        return;
    }
    let oldest = entries
        .iter()
        .filter(|(_, entry)| entry.ttl != PINNED_TTL)
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(name: &str) -> CacheKey {
        (name.to_string(), RecordType::A)
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = ResponseCache::new(16, DEFAULT_CACHE_TTL);
        cache.put(key("a.com"), vec![1, 2, 3], 60);
        assert_eq!(cache.get(&key("a.com")), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&key("b.com")), None);
        assert_eq!(cache.get(&("a.com".to_string(), RecordType::AAAA)), None);
    }

    #[test]
    fn test_expired_entries_are_evicted_on_access() {
        let cache = ResponseCache::new(16, DEFAULT_CACHE_TTL);
        cache.put(key("a.com"), vec![1], 0);
        thread::sleep(time::Duration::from_millis(5));
        assert_eq!(cache.get(&key("a.com")), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_purge_preserves_pinned_entries() {
        let cache = ResponseCache::new(16, DEFAULT_CACHE_TTL);
        cache.put(key("static.my"), vec![1], PINNED_TTL);
        cache.put(key("a.com"), vec![2], 300);
        cache.put(key("b.com"), vec![3], 7200);
        cache.purge_dynamic();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("static.my")), Some(vec![1]));
    }

    #[test]
    fn test_eviction_prefers_expired_entries() {
        let cache = ResponseCache::new(2, DEFAULT_CACHE_TTL);
        cache.put(key("fresh.com"), vec![1], 600);
        cache.put(key("stale.com"), vec![2], 0);
        thread::sleep(time::Duration::from_millis(5));
        cache.put(key("new.com"), vec![3], 600);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("fresh.com")).is_some());
        assert!(cache.get(&key("new.com")).is_some());
    }

    #[test]
    fn test_eviction_falls_back_to_lru() {
        let cache = ResponseCache::new(2, DEFAULT_CACHE_TTL);
        cache.put(key("old.com"), vec![1], 600);
        thread::sleep(time::Duration::from_millis(5));
        cache.put(key("young.com"), vec![2], 600);
        thread::sleep(time::Duration::from_millis(5));
        // Touch the older entry so the other one becomes the LRU victim.
        cache.get(&key("old.com"));
        cache.put(key("new.com"), vec![3], 600);
        assert!(cache.get(&key("old.com")).is_some());
        assert!(cache.get(&key("young.com")).is_none());
        assert!(cache.get(&key("new.com")).is_some());
    }

    #[test]
    fn test_pinned_entries_are_not_eviction_victims() {
        let cache = ResponseCache::new(2, DEFAULT_CACHE_TTL);
        cache.put(key("static.my"), vec![1], PINNED_TTL);
        cache.put(key("a.com"), vec![2], 600);
        cache.put(key("b.com"), vec![3], 600);
        assert!(cache.get(&key("static.my")).is_some());
        assert!(cache.get(&key("b.com")).is_some());
        assert!(cache.get(&key("a.com")).is_none());
    }

    #[test]
    fn test_zero_capacity_disables_the_cache() {
        let cache = ResponseCache::new(0, DEFAULT_CACHE_TTL);
        cache.put(key("a.com"), vec![1], 600);
        assert_eq!(cache.get(&key("a.com")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(2, DEFAULT_CACHE_TTL);
        cache.put(key("a.com"), vec![1], 600);
        cache.put(key("b.com"), vec![2], 600);
        cache.put(key("a.com"), vec![9], 600);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key("a.com")), Some(vec![9]));
    }
}
