use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use crate::core::clock::Clock;
use crate::core::error::Result;
use crate::core::types::{Document, FetchType, ShardKey};
use crate::engine::{IndexEngine, ShardSearch};
use crate::index::index_config::IndexConfig;
use crate::reader::shard_reader::ShardSearcher;
use crate::search::results::ShardQueryResult;
use crate::writer::shard_writer::ShardLifecycle;

const WARMING_TOP_N: usize = 10;

/// One locally hosted shard: its write manager plus the reader queries run
/// against. The reader is replaced after every commit.
pub struct IndexShard {
    config: Arc<IndexConfig>,
    manager: ShardLifecycle,
    reader: RwLock<Arc<ShardSearcher>>,
}

impl IndexShard {
    pub fn open(
        config: Arc<IndexConfig>,
        shard_number: u32,
        engine: Arc<dyn IndexEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key = ShardKey::new(config.index_name(), shard_number);
        let manager = ShardLifecycle::open(key, config.clone(), engine, clock)?;
        let reader = manager.open_reader_snapshot()?;

        Ok(IndexShard {
            config,
            manager,
            reader: RwLock::new(Arc::new(reader)),
        })
    }

    pub fn shard_number(&self) -> u32 {
        self.manager.key().shard_number
    }

    pub fn manager(&self) -> &ShardLifecycle {
        &self.manager
    }

    pub fn store(&self, document: &Document) -> Result<()> {
        if self.manager.index_document(document)? {
            self.commit()?;
        }
        Ok(())
    }

    pub fn delete(&self, unique_id: &str) -> Result<()> {
        if self.manager.delete_document(unique_id)? {
            self.commit()?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.manager.delete_all()?;
        self.commit()
    }

    pub fn commit(&self) -> Result<()> {
        self.manager.commit()?;
        self.refresh_reader()
    }

    pub fn refresh_reader(&self) -> Result<()> {
        let reader = self.manager.open_reader_snapshot()?;
        *self.reader.write() = Arc::new(reader);
        Ok(())
    }

    pub fn reader(&self) -> Arc<ShardSearcher> {
        self.reader.read().clone()
    }

    /// Runs against the reader of the last commit.
    pub fn query(&self, search: &ShardSearch) -> Result<ShardQueryResult> {
        self.reader().search(search)
    }

    /// Real-time lookup that also sees uncommitted stores.
    pub fn fetch(&self, unique_id: &str, fetch_type: FetchType) -> Result<Option<Document>> {
        Ok(self.manager.open_snapshot()?.fetch(unique_id, fetch_type))
    }

    pub fn optimize(&self) -> Result<()> {
        self.manager.force_merge(1)?;
        self.commit()
    }

    pub fn update_index_settings(&self) -> Result<()> {
        self.manager.update_index_settings();
        // New cache size only applies to a new reader
        self.refresh_reader()
    }

    /// Idle commit and search warming, as decided by the write manager.
    pub fn maintain(&self) -> Result<()> {
        if self.manager.needs_idle_commit() {
            debug!("Idle commit of shard <{}> for index <{}>", self.shard_number(), self.config.index_name());
            self.commit()?;
        }

        if self.manager.needs_search_warming() {
            self.warm();
            self.manager.mark_warmed();
        }
        Ok(())
    }

    fn warm(&self) {
        let settings = self.config.settings();
        if settings.warming_searches.is_empty() {
            return;
        }

        info!("Warming shard <{}> for index <{}> with {} search(es)",
            self.shard_number(), self.config.index_name(), settings.warming_searches.len());

        let reader = self.reader();
        let options = match self.config.default_compile_options() {
            Ok(options) => options,
            Err(e) => {
                warn!("Cannot warm shard <{}> of index <{}>: {}", self.shard_number(), self.config.index_name(), e);
                return;
            }
        };
        for text in &settings.warming_searches {
            let result = self
                .config
                .compile(text, &options)
                .and_then(|query| reader.search(&ShardSearch::new(query, WARMING_TOP_N)));
            if let Err(e) = result {
                warn!("Warming search <{}> failed on shard <{}> of index <{}>: {}",
                    text, self.shard_number(), self.config.index_name(), e);
            }
        }
    }

    /// Commits outstanding changes, then closes the writers. The writers are
    /// closed even when the final commit fails.
    pub fn close(&self) -> Result<()> {
        let dirty = match (self.manager.last_change_time(), self.manager.last_commit_time()) {
            (Some(change), Some(commit)) => change > commit,
            (Some(_), None) => true,
            _ => false,
        };

        let commit_result = if dirty && !self.manager.has_failed() {
            self.manager.commit()
        } else {
            Ok(())
        };
        let close_result = self.manager.close();
        commit_result.and(close_result)
    }
}
