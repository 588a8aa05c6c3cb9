use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Small time-bounded cache owned by whoever needs it (the server state).
/// Entries older than the TTL are evicted when read and on every insert; a zero TTL stores nothing.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn is_enabled(&self) -> bool { !self.ttl.is_zero() }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() { return None; }
        let mut entries = self.entries.lock().ok()?;
        let fresh = match entries.get(key) {
            Some((at, _)) => at.elapsed() < self.ttl,
            None => return None,
        };
        if fresh {
            entries.get(key).map(|(_, v)| v.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    /// Store `value` after dropping every expired entry; returns how many entries remain.
    pub fn insert(&self, key: K, value: V) -> usize {
        if !self.is_enabled() { return 0; }
        let Ok(mut entries) = self.entries.lock() else { return 0 };
        let ttl = self.ttl;
        entries.retain(|_, (at, _)| at.elapsed() < ttl);
        entries.insert(key, (Instant::now(), value));
        entries.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.entries.lock().map(|e| e.len()).unwrap_or(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(300));
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_overwrites_and_drops_stale() {
        let cache: TtlCache<u8, &str> = TtlCache::new(Duration::from_secs(10));
        cache.insert(1, "old");
        assert_eq!(cache.insert(1, "new"), 1);
        assert_eq!(cache.get(&1), Some("new"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.insert(2, "young"), 2);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.insert(3, "newest"), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some("young"));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_never_read_again_do_not_accumulate() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(50));
        for day in 0..5 {
            cache.insert(day, day);
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.insert(99, 99), 1);
    }

    #[test]
    fn zero_ttl_disables() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::ZERO);
        assert_eq!(cache.insert(1, 1), 0);
        assert!(!cache.is_enabled());
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 0);
    }
}
