use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::{Document, FetchType, ShardKey};
use crate::engine::{ShardSearch, ShardSnapshot};
use crate::query::cache::{CacheStats, QueryCache, QueryKey};
use crate::search::results::ShardQueryResult;

/// Reader over one snapshot of a shard, with its own result cache.
/// Cheap to share; stays usable after the shard's writer is closed.
pub struct ShardSearcher {
    key: ShardKey,
    snapshot: Arc<dyn ShardSnapshot>,
    cache: QueryCache,
}

impl ShardSearcher {
    pub fn new(key: ShardKey, snapshot: Arc<dyn ShardSnapshot>, cache_size: usize) -> Self {
        ShardSearcher {
            key,
            snapshot,
            cache: QueryCache::new(cache_size),
        }
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub fn search(&self, search: &ShardSearch) -> Result<ShardQueryResult> {
        let cache_key = QueryKey::of(search);
        if let Some(cached) = cache_key.as_ref().and_then(|k| self.cache.get(k)) {
            return Ok(cached);
        }

        let result = self.snapshot.search(search)?;
        if let Some(cache_key) = cache_key {
            self.cache.put(cache_key, result.clone());
        }
        Ok(result)
    }

    pub fn fetch(&self, unique_id: &str, fetch_type: FetchType) -> Option<Document> {
        self.snapshot.fetch(unique_id, fetch_type)
    }

    pub fn doc_count(&self) -> usize {
        self.snapshot.doc_count()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::analysis::analyzer::Analyzer;
    use crate::core::config::IndexSettings;
    use crate::engine::IndexEngine;
    use crate::engine::indexer::DocumentIndexer;
    use crate::engine::memory::MemoryEngine;
    use crate::query::ast::Query;
    use crate::schema::schema::FieldCatalog;

    #[test]
    fn repeated_search_is_served_from_cache() {
        let engine = MemoryEngine::new();
        let key = ShardKey::new("books", 0);
        let writer = engine.open_index_writer(&key, &IndexSettings::default()).unwrap();
        let catalog = FieldCatalog::new();
        let analyzer = Analyzer::standard();
        let doc = DocumentIndexer::new(&catalog, &analyzer)
            .index(&Document::new("1", "books", json!({"title": "dune"})))
            .unwrap();
        writer.update_document(doc).unwrap();

        let reader = ShardSearcher::new(key, writer.open_reader().unwrap(), 8);
        let search = ShardSearch::new(Query::term("title", "dune"), 10);

        let first = reader.search(&search).unwrap();
        let second = reader.search(&search).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_hits, 1);

        let stats = reader.cache_stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }
}
