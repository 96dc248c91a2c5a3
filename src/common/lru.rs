/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{borrow::Borrow, hash::Hash, time::Instant};

use parking_lot::Mutex;

/// LRU map of DNS answers, each entry expiring with the TTL of the record
/// it was built from.
pub(crate) type LruCache<K, V> = Mutex<lru_cache::LruCache<K, CachedAnswer<V>, ahash::RandomState>>;

#[derive(Debug, Clone)]
pub(crate) struct CachedAnswer<V> {
    answer: V,
    expires: Instant,
}

pub(crate) trait DnsCache<K, V>: Sized {
    fn with_capacity(capacity: usize) -> Self;
    fn get<Q: ?Sized>(&self, name: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq;
    fn insert(&self, name: K, answer: V, expires: Instant) -> V;
}

impl<K: Hash + Eq, V: Clone> DnsCache<K, V> for LruCache<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Mutex::new(lru_cache::LruCache::with_hasher(
            capacity.max(1),
            ahash::RandomState::new(),
        ))
    }

    fn get<Q: ?Sized>(&self, name: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let mut cache = self.lock();
        let cached = cache.get_mut(name)?;
        if cached.expires >= Instant::now() {
            Some(cached.answer.clone())
        } else {
            // Stale, force a fresh lookup
            cache.remove(name);
            None
        }
    }

    fn insert(&self, name: K, answer: V, expires: Instant) -> V {
        self.lock().insert(
            name,
            CachedAnswer {
                answer: answer.clone(),
                expires,
            },
        );
        answer
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{DnsCache, LruCache};

    #[test]
    fn expired_answers_are_evicted() {
        let cache: LruCache<String, u32> = LruCache::with_capacity(2);
        let now = Instant::now();

        cache.insert("fresh.".to_string(), 1, now + Duration::from_secs(60));
        cache.insert("stale.".to_string(), 2, now - Duration::from_secs(1));

        assert_eq!(cache.get("fresh."), Some(1));
        assert_eq!(cache.get("stale."), None);
        assert_eq!(cache.lock().len(), 1);

        // Least recently used entry goes first
        cache.insert("a.".to_string(), 3, now + Duration::from_secs(60));
        cache.insert("b.".to_string(), 4, now + Duration::from_secs(60));
        assert_eq!(cache.get("fresh."), None);
        assert_eq!(cache.get("b."), Some(4));
    }
}
