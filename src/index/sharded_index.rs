use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{error, info};
use crate::core::clock::Clock;
use crate::core::config::IndexSettings;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, FetchType};
use crate::engine::{IndexEngine, ShardSearch};
use crate::index::index_config::IndexConfig;
use crate::index::index_shard::IndexShard;
use crate::search::results::ShardQueryResult;

/// Shard that owns a document id. Stable for a fixed shard count.
pub fn shard_for_id(unique_id: &str, number_of_shards: u32) -> u32 {
    crc32fast::hash(unique_id.as_bytes()) % number_of_shards.max(1)
}

/// Locally hosted shards of one index. The shard map is read on every
/// request and written only when shards are loaded or unloaded.
pub struct ShardedIndex {
    config: Arc<IndexConfig>,
    engine: Arc<dyn IndexEngine>,
    clock: Arc<dyn Clock>,
    shards: RwLock<HashMap<u32, Arc<IndexShard>>>,
}

impl ShardedIndex {
    pub fn new(config: Arc<IndexConfig>, engine: Arc<dyn IndexEngine>, clock: Arc<dyn Clock>) -> Self {
        ShardedIndex {
            config,
            engine,
            clock,
            shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn open(
        config: Arc<IndexConfig>,
        engine: Arc<dyn IndexEngine>,
        clock: Arc<dyn Clock>,
        shard_numbers: &[u32],
    ) -> Result<Self> {
        let index = ShardedIndex::new(config, engine, clock);
        for &shard_number in shard_numbers {
            index.load_shard(shard_number)?;
        }
        Ok(index)
    }

    pub fn config(&self) -> &Arc<IndexConfig> {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        self.config.index_name()
    }

    pub fn load_shard(&self, shard_number: u32) -> Result<()> {
        let number_of_shards = self.config.number_of_shards();
        if shard_number >= number_of_shards {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("index <{}> has {} shards, cannot load shard <{}>",
                    self.index_name(), number_of_shards, shard_number),
            ));
        }
        if self.shards.read().contains_key(&shard_number) {
            return Ok(());
        }

        // Opened outside the map lock; the map only ever sees open shards
        let shard = IndexShard::open(self.config.clone(), shard_number, self.engine.clone(), self.clock.clone())?;
        let mut shards = self.shards.write();
        if shards.contains_key(&shard_number) {
            drop(shards);
            return shard.close();
        }
        shards.insert(shard_number, Arc::new(shard));
        info!("Loaded shard <{}> of index <{}>", shard_number, self.index_name());
        Ok(())
    }

    pub fn unload_shard(&self, shard_number: u32) -> Result<()> {
        let removed = self.shards.write().remove(&shard_number);
        match removed {
            Some(shard) => shard.close(),
            None => Err(Error::shard_unavailable(self.index_name(), shard_number)),
        }
    }

    pub fn shard_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.shards.read().keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn shard(&self, shard_number: u32) -> Result<Arc<IndexShard>> {
        self.shards
            .read()
            .get(&shard_number)
            .cloned()
            .ok_or_else(|| Error::shard_unavailable(self.index_name(), shard_number))
    }

    fn local_shards(&self) -> Vec<Arc<IndexShard>> {
        let mut shards: Vec<Arc<IndexShard>> = self.shards.read().values().cloned().collect();
        shards.sort_by_key(|s| s.shard_number());
        shards
    }

    pub fn shard_for_id(&self, unique_id: &str) -> u32 {
        shard_for_id(unique_id, self.config.number_of_shards())
    }

    pub fn store(&self, document: &Document) -> Result<()> {
        if document.index_name != self.index_name() {
            return Err(Error::malformed(format!(
                "document <{}> is addressed to index <{}>, not <{}>",
                document.unique_id, document.index_name, self.index_name()
            )));
        }
        self.shard(self.shard_for_id(&document.unique_id))?.store(document)
    }

    pub fn delete(&self, unique_id: &str) -> Result<()> {
        self.shard(self.shard_for_id(unique_id))?.delete(unique_id)
    }

    pub fn fetch(&self, unique_id: &str, fetch_type: FetchType) -> Result<Option<Document>> {
        self.shard(self.shard_for_id(unique_id))?.fetch(unique_id, fetch_type)
    }

    pub fn shard_query(&self, shard_number: u32, search: &ShardSearch) -> Result<ShardQueryResult> {
        self.shard(shard_number)?.query(search)
    }

    pub fn clear(&self) -> Result<()> {
        self.for_each_shard("clear", |shard| shard.clear())
    }

    pub fn optimize(&self) -> Result<()> {
        self.for_each_shard("optimize", |shard| shard.optimize())
    }

    pub fn commit(&self) -> Result<()> {
        self.for_each_shard("commit", |shard| shard.commit())
    }

    pub fn run_maintenance(&self) -> Result<()> {
        self.for_each_shard("maintenance", |shard| shard.maintain())
    }

    pub fn update_settings(&self, settings: IndexSettings) -> Result<()> {
        self.config.update_settings(settings)?;
        self.for_each_shard("settings update", |shard| shard.update_index_settings())
    }

    pub fn close(&self) -> Result<()> {
        let shards: Vec<Arc<IndexShard>> = self.shards.write().drain().map(|(_, s)| s).collect();
        let mut first_error = None;
        for shard in shards {
            if let Err(e) = shard.close() {
                error!("Failed to close shard <{}> of index <{}>: {}", shard.shard_number(), self.index_name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Applies `op` to every local shard, continuing past failures and
    /// returning the first one.
    fn for_each_shard<F>(&self, action: &str, op: F) -> Result<()>
    where
        F: Fn(&IndexShard) -> Result<()>,
    {
        let mut first_error = None;
        for shard in self.local_shards() {
            if let Err(e) = op(&shard) {
                error!("Shard <{}> of index <{}> failed {}: {}", shard.shard_number(), self.index_name(), action, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::clock::SystemClock;
    use crate::core::types::ShardKey;
    use crate::engine::memory::MemoryEngine;
    use crate::query::ast::Query;
    use crate::schema::schema::FieldCatalog;

    fn index(shards: u32, local: &[u32]) -> (ShardedIndex, Arc<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        let settings = IndexSettings { number_of_shards: shards, ..IndexSettings::default() };
        let config = Arc::new(IndexConfig::new("books", FieldCatalog::new(), settings));
        let index = ShardedIndex::open(config, engine.clone(), Arc::new(SystemClock), local).unwrap();
        (index, engine)
    }

    #[test]
    fn ids_spread_over_shards_deterministically() {
        assert_eq!(shard_for_id("doc-1", 4), shard_for_id("doc-1", 4));
        assert_eq!(shard_for_id("anything", 1), 0);

        let used: std::collections::HashSet<u32> = (0..100).map(|i| shard_for_id(&i.to_string(), 4)).collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn store_routes_to_owning_shard() {
        let (index, engine) = index(3, &[0, 1, 2]);
        for i in 0..20 {
            index.store(&Document::new(&i.to_string(), "books", json!({"n": i}))).unwrap();
        }
        index.commit().unwrap();

        let total: usize = (0..3).map(|s| engine.committed_doc_count(&ShardKey::new("books", s))).sum();
        assert_eq!(total, 20);

        let owner = index.shard_for_id("7");
        let hits = index.shard_query(owner, &ShardSearch::new(Query::MatchAll, 100)).unwrap();
        assert!(hits.hits.iter().any(|h| h.unique_id == "7"));
    }

    #[test]
    fn missing_shard_is_unavailable() {
        let (index, _) = index(2, &[0]);
        let remote_id = (0..100).map(|i| i.to_string()).find(|id| index.shard_for_id(id) == 1).unwrap();

        let err = index.store(&Document::new(&remote_id, "books", json!({}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShardUnavailable);
        assert!(index.load_shard(5).is_err());
    }

    #[test]
    fn idempotent_store_and_delete() {
        let (index, _) = index(1, &[0]);
        let doc = Document::new("1", "books", json!({"title": "dune"}));
        index.store(&doc).unwrap();
        index.store(&doc).unwrap();
        index.delete("1").unwrap();
        index.delete("1").unwrap();
        index.commit().unwrap();
        assert_eq!(index.shard(0).unwrap().reader().doc_count(), 0);
    }

    #[test]
    fn clear_and_close() {
        let (index, engine) = index(2, &[0, 1]);
        for i in 0..10 {
            index.store(&Document::new(&i.to_string(), "books", json!({}))).unwrap();
        }
        index.clear().unwrap();
        index.close().unwrap();
        assert!(index.shard_numbers().is_empty());
        assert_eq!(engine.committed_doc_count(&ShardKey::new("books", 0)), 0);
    }
}
