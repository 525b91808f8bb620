use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use crate::engine::ShardSearch;
use crate::search::results::ShardQueryResult;

/// Query result cache for one shard reader. Dropped with the reader, so a
/// refreshed reader always starts cold.
pub struct QueryCache {
    cache: Option<Mutex<LruCache<QueryKey, ShardQueryResult>>>,   // None when disabled
    size_limit: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QueryKey(String);

impl QueryKey {
    /// Serialized search; floats inside the query make the struct itself unhashable.
    pub fn of(search: &ShardSearch) -> Option<Self> {
        serde_json::to_string(search).ok().map(QueryKey)
    }
}

impl QueryCache {
    pub fn new(size_limit: usize) -> Self {
        QueryCache {
            cache: NonZeroUsize::new(size_limit).map(|cap| Mutex::new(LruCache::new(cap))),
            size_limit,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<ShardQueryResult> {
        let cache = self.cache.as_ref()?;
        if let Some(results) = cache.lock().get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(results.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: QueryKey, results: ShardQueryResult) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key, results);
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0),
            capacity: self.size_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Query;

    fn result(total_hits: u64) -> ShardQueryResult {
        ShardQueryResult {
            index_name: "books".to_string(),
            shard_number: 0,
            total_hits,
            hits: Vec::new(),
            facets: Vec::new(),
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = QueryCache::new(1);
        let first = QueryKey::of(&ShardSearch::new(Query::MatchAll, 10)).unwrap();
        let second = QueryKey::of(&ShardSearch::new(Query::term("title", "rust"), 10)).unwrap();

        cache.put(first.clone(), result(1));
        assert_eq!(cache.get(&first).map(|r| r.total_hits), Some(1));
        cache.put(second.clone(), result(2));
        assert!(cache.get(&first).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn page_size_is_part_of_the_key() {
        let small = QueryKey::of(&ShardSearch::new(Query::MatchAll, 10)).unwrap();
        let large = QueryKey::of(&ShardSearch::new(Query::MatchAll, 20)).unwrap();
        assert_ne!(small, large);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = QueryCache::new(0);
        let key = QueryKey::of(&ShardSearch::new(Query::MatchAll, 10)).unwrap();
        cache.put(key.clone(), result(1));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().size, 0);
    }
}
