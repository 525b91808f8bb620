pub mod indexer;
pub mod matcher;
pub mod memory;

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::core::config::IndexSettings;
use crate::core::error::Result;
use crate::core::types::{Document, FetchType, ShardKey};
use crate::query::ast::Query;
use crate::search::results::{CountRequest, ResultCursor, ShardQueryResult, SortField};
use self::indexer::IndexedDocument;

/// Opens the writer pair backing one shard
pub trait IndexEngine: Send + Sync {
    fn open_index_writer(&self, key: &ShardKey, settings: &IndexSettings) -> Result<Box<dyn IndexWriter>>;
    fn open_taxonomy_writer(&self, key: &ShardKey) -> Result<Box<dyn TaxonomyWriter>>;
}

/// Shard writer. Thread safe; callers serialize structural mutation.
pub trait IndexWriter: Send + Sync {
    /// Replaces any document with the same unique id
    fn update_document(&self, document: IndexedDocument) -> Result<()>;
    fn delete_document(&self, unique_id: &str) -> Result<()>;
    fn delete_all(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn force_merge(&self, max_segments: usize) -> Result<()>;
    fn set_ram_buffer_mb(&self, mb: usize);
    /// Near-real-time view including uncommitted changes
    fn open_reader(&self) -> Result<Arc<dyn ShardSnapshot>>;
    fn close(&self) -> Result<()>;
}

/// Facet label dictionary kept next to the index
pub trait TaxonomyWriter: Send + Sync {
    fn add_labels(&self, dimension: &str, labels: &[String]) -> Result<Vec<u32>>;
    fn size(&self) -> usize;
    fn commit(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Point-in-time read view. Stays valid after its writer is closed.
pub trait ShardSnapshot: Send + Sync {
    fn search(&self, search: &ShardSearch) -> Result<ShardQueryResult>;
    fn fetch(&self, unique_id: &str, fetch_type: FetchType) -> Option<Document>;
    fn doc_count(&self) -> usize;
    fn generation(&self) -> u64;
}

/// One shard's share of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearch {
    pub query: Query,
    pub top_n: usize,
    pub sort: Option<SortField>,
    pub count_requests: Vec<CountRequest>,
    pub after: Option<ResultCursor>,
    pub fetch_type: FetchType,
}

impl ShardSearch {
    pub fn new(query: Query, top_n: usize) -> Self {
        ShardSearch {
            query,
            top_n,
            sort: None,
            count_requests: Vec::new(),
            after: None,
            fetch_type: FetchType::None,
        }
    }
}
