use std::sync::Arc;
use tracing::warn;
use crate::core::config::IndexSettings;
use crate::core::error::Result;
use crate::core::types::ShardKey;
use crate::engine::indexer::IndexedDocument;
use crate::engine::{IndexEngine, IndexWriter, ShardSnapshot, TaxonomyWriter};

/// Index writer and taxonomy writer of one shard. They are opened,
/// committed and closed as a unit.
pub struct WriterGroup {
    index_writer: Box<dyn IndexWriter>,
    taxonomy_writer: Box<dyn TaxonomyWriter>,
}

impl WriterGroup {
    pub fn open(engine: &dyn IndexEngine, key: &ShardKey, settings: &IndexSettings) -> Result<Self> {
        let index_writer = engine.open_index_writer(key, settings)?;
        let taxonomy_writer = match engine.open_taxonomy_writer(key) {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(close_err) = index_writer.close() {
                    warn!("Failed to close index writer for shard <{}> of index <{}>: {}",
                        key.shard_number, key.index_name, close_err);
                }
                return Err(e);
            }
        };

        Ok(WriterGroup { index_writer, taxonomy_writer })
    }

    pub fn update_document(&self, document: IndexedDocument) -> Result<()> {
        for (dimension, labels) in &document.facets {
            self.taxonomy_writer.add_labels(dimension, labels)?;
        }
        self.index_writer.update_document(document)
    }

    pub fn delete_document(&self, unique_id: &str) -> Result<()> {
        self.index_writer.delete_document(unique_id)
    }

    pub fn delete_all(&self) -> Result<()> {
        self.index_writer.delete_all()
    }

    /// Taxonomy first so committed documents never reference unknown ordinals.
    pub fn commit(&self) -> Result<()> {
        self.taxonomy_writer.commit()?;
        self.index_writer.commit()
    }

    pub fn force_merge(&self, max_segments: usize) -> Result<()> {
        self.index_writer.force_merge(max_segments)
    }

    pub fn set_ram_buffer_mb(&self, mb: usize) {
        self.index_writer.set_ram_buffer_mb(mb);
    }

    pub fn open_reader(&self) -> Result<Arc<dyn ShardSnapshot>> {
        self.index_writer.open_reader()
    }

    pub fn taxonomy_size(&self) -> usize {
        self.taxonomy_writer.size()
    }

    /// Closes both writers even if the first one fails; reports the first error.
    pub fn close(self) -> Result<()> {
        let index_result = self.index_writer.close();
        let taxonomy_result = self.taxonomy_writer.close();
        index_result.and(taxonomy_result)
    }
}
