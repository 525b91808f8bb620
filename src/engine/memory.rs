use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::debug;
use crate::core::config::IndexSettings;
use crate::core::error::{Error, Result};
use crate::core::types::{Document, FetchType, ShardKey};
use crate::engine::indexer::IndexedDocument;
use crate::engine::matcher::Matcher;
use crate::engine::{IndexEngine, IndexWriter, ShardSearch, ShardSnapshot, TaxonomyWriter};
use crate::search::results::{
    sort_facet_counts, FacetCount, FacetResult, ScoredResult, ShardQueryResult, TopKCollector,
};

/// Documents visible at one generation. Shared copy-on-write between the
/// writer and every snapshot taken from it.
#[derive(Debug, Clone, Default)]
struct SegmentState {
    docs: BTreeMap<String, Arc<IndexedDocument>>,
    segment_count: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_mutations: AtomicBool,
    fail_commits: AtomicBool,
    fail_close: AtomicBool,
}

/// Durable side of one shard: what survives a writer close
#[derive(Debug, Default)]
struct MemoryDirectory {
    committed: RwLock<Arc<SegmentState>>,
    taxonomy: RwLock<Arc<HashMap<String, u32>>>,
    commit_count: AtomicU64,
    faults: Faults,
}

/// In-process engine keeping each shard's committed state in memory.
/// Uncommitted changes are lost when a writer is closed or reopened.
#[derive(Default)]
pub struct MemoryEngine {
    directories: RwLock<HashMap<ShardKey, Arc<MemoryDirectory>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine::default()
    }

    fn directory(&self, key: &ShardKey) -> Arc<MemoryDirectory> {
        if let Some(directory) = self.directories.read().get(key) {
            return directory.clone();
        }
        self.directories
            .write()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    pub fn fail_mutations(&self, key: &ShardKey, fail: bool) {
        self.directory(key).faults.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, key: &ShardKey, fail: bool) {
        self.directory(key).faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, key: &ShardKey, fail: bool) {
        self.directory(key).faults.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn commit_count(&self, key: &ShardKey) -> u64 {
        self.directory(key).commit_count.load(Ordering::SeqCst)
    }

    pub fn committed_doc_count(&self, key: &ShardKey) -> usize {
        self.directory(key).committed.read().docs.len()
    }

    pub fn committed_segment_count(&self, key: &ShardKey) -> usize {
        self.directory(key).committed.read().segment_count
    }

    pub fn committed_taxonomy_size(&self, key: &ShardKey) -> usize {
        self.directory(key).taxonomy.read().len()
    }
}

impl IndexEngine for MemoryEngine {
    fn open_index_writer(&self, key: &ShardKey, settings: &IndexSettings) -> Result<Box<dyn IndexWriter>> {
        let directory = self.directory(key);
        let committed = directory.committed.read().clone();
        debug!("Opening memory writer for shard <{}> of index <{}> at generation {}",
            key.shard_number, key.index_name, committed.generation);

        Ok(Box::new(MemoryIndexWriter {
            key: key.clone(),
            directory,
            pending: Mutex::new(committed),
            ram_buffer_mb: AtomicUsize::new(settings.effective_ram_buffer_mb()),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    fn open_taxonomy_writer(&self, key: &ShardKey) -> Result<Box<dyn TaxonomyWriter>> {
        let directory = self.directory(key);
        let ordinals = directory.taxonomy.read().as_ref().clone();
        Ok(Box::new(MemoryTaxonomyWriter {
            key: key.clone(),
            directory,
            ordinals: Mutex::new(ordinals),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MemoryIndexWriter {
    key: ShardKey,
    directory: Arc<MemoryDirectory>,
    pending: Mutex<Arc<SegmentState>>,
    ram_buffer_mb: AtomicUsize,
    dirty: AtomicBool,
    closed: AtomicBool,
}

impl MemoryIndexWriter {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.failure("writer is closed"));
        }
        Ok(())
    }

    fn failure(&self, cause: &str) -> Error {
        Error::engine(&self.key.index_name, self.key.shard_number, cause)
    }

    fn apply<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SegmentState),
    {
        self.check_open()?;
        if self.directory.faults.fail_mutations.load(Ordering::SeqCst) {
            return Err(self.failure("injected mutation failure"));
        }

        let mut pending = self.pending.lock();
        let state = Arc::make_mut(&mut pending);
        change(state);
        state.generation += 1;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn ram_buffer_mb(&self) -> usize {
        self.ram_buffer_mb.load(Ordering::Relaxed)
    }
}

impl IndexWriter for MemoryIndexWriter {
    fn update_document(&self, document: IndexedDocument) -> Result<()> {
        self.apply(|state| {
            state.docs.insert(document.unique_id.clone(), Arc::new(document));
        })
    }

    fn delete_document(&self, unique_id: &str) -> Result<()> {
        self.apply(|state| {
            state.docs.remove(unique_id);
        })
    }

    fn delete_all(&self) -> Result<()> {
        self.apply(|state| {
            state.docs.clear();
            state.segment_count = 0;
        })
    }

    fn commit(&self) -> Result<()> {
        self.check_open()?;
        if self.directory.faults.fail_commits.load(Ordering::SeqCst) {
            return Err(self.failure("injected commit failure"));
        }

        let mut pending = self.pending.lock();
        if self.dirty.swap(false, Ordering::SeqCst) {
            Arc::make_mut(&mut pending).segment_count += 1;
        }
        *self.directory.committed.write() = pending.clone();
        self.directory.commit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn force_merge(&self, max_segments: usize) -> Result<()> {
        self.check_open()?;
        let mut pending = self.pending.lock();
        let state = Arc::make_mut(&mut pending);
        state.segment_count = state.segment_count.min(max_segments.max(1));
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_ram_buffer_mb(&self, mb: usize) {
        self.ram_buffer_mb.store(mb, Ordering::Relaxed);
    }

    fn open_reader(&self) -> Result<Arc<dyn ShardSnapshot>> {
        self.check_open()?;
        let state = self.pending.lock().clone();
        Ok(Arc::new(MemorySnapshot { key: self.key.clone(), state }))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.directory.faults.fail_close.load(Ordering::SeqCst) {
            return Err(self.failure("injected close failure"));
        }
        Ok(())
    }
}

pub struct MemoryTaxonomyWriter {
    key: ShardKey,
    directory: Arc<MemoryDirectory>,
    ordinals: Mutex<HashMap<String, u32>>,
    closed: AtomicBool,
}

impl TaxonomyWriter for MemoryTaxonomyWriter {
    fn add_labels(&self, dimension: &str, labels: &[String]) -> Result<Vec<u32>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::engine(&self.key.index_name, self.key.shard_number, "taxonomy writer is closed"));
        }
        let mut ordinals = self.ordinals.lock();
        Ok(labels
            .iter()
            .map(|label| {
                let next = ordinals.len() as u32;
                *ordinals.entry(format!("{}/{}", dimension, label)).or_insert(next)
            })
            .collect())
    }

    fn size(&self) -> usize {
        self.ordinals.lock().len()
    }

    fn commit(&self) -> Result<()> {
        let ordinals = self.ordinals.lock().clone();
        *self.directory.taxonomy.write() = Arc::new(ordinals);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.directory.faults.fail_close.load(Ordering::SeqCst) {
            return Err(Error::engine(&self.key.index_name, self.key.shard_number, "injected taxonomy close failure"));
        }
        Ok(())
    }
}

pub struct MemorySnapshot {
    key: ShardKey,
    state: Arc<SegmentState>,
}

impl MemorySnapshot {
    fn facet_counts(&self, matched: &[(&IndexedDocument, f32)], search: &ShardSearch) -> Vec<FacetResult> {
        search
            .count_requests
            .iter()
            .map(|request| {
                let mut counts: HashMap<&str, u64> = HashMap::new();
                for (doc, _) in matched {
                    if let Some(labels) = doc.facets.get(&request.field) {
                        for label in labels {
                            *counts.entry(label.as_str()).or_insert(0) += 1;
                        }
                    }
                }
                let mut counts: Vec<FacetCount> = counts
                    .into_iter()
                    .map(|(label, count)| FacetCount { label: label.to_string(), count })
                    .collect();
                sort_facet_counts(&mut counts);
                FacetResult { field: request.field.clone(), counts }
            })
            .collect()
    }
}

impl ShardSnapshot for MemorySnapshot {
    fn search(&self, search: &ShardSearch) -> Result<ShardQueryResult> {
        let matcher = Matcher::compile(&search.query)?;

        let matched: Vec<(&IndexedDocument, f32)> = self
            .state
            .docs
            .par_iter()
            .filter_map(|(_, doc)| matcher.score(doc).map(|score| (doc.as_ref(), score)))
            .collect();

        let sort = search.sort.as_ref();
        let mut collector = TopKCollector::new(search.top_n, search.sort.clone());
        for (doc, score) in &matched {
            let hit = ScoredResult {
                unique_id: doc.unique_id.clone(),
                index_name: self.key.index_name.clone(),
                shard_number: self.key.shard_number,
                score: *score,
                sort_value: sort.and_then(|s| doc.sort_values.get(&s.field).cloned()),
                timestamp: doc.document.timestamp,
                document: None,
            };
            if search.after.as_ref().is_none_or(|cursor| cursor.precedes(&hit, sort)) {
                collector.collect(hit);
            }
        }

        let mut hits = collector.into_results();
        for hit in &mut hits {
            hit.document = self
                .state
                .docs
                .get(&hit.unique_id)
                .and_then(|doc| doc.document.for_fetch_type(search.fetch_type));
        }

        Ok(ShardQueryResult {
            index_name: self.key.index_name.clone(),
            shard_number: self.key.shard_number,
            total_hits: matched.len() as u64,
            hits,
            facets: self.facet_counts(&matched, search),
        })
    }

    fn fetch(&self, unique_id: &str, fetch_type: FetchType) -> Option<Document> {
        self.state
            .docs
            .get(unique_id)
            .and_then(|doc| doc.document.for_fetch_type(fetch_type))
    }

    fn doc_count(&self) -> usize {
        self.state.docs.len()
    }

    fn generation(&self) -> u64 {
        self.state.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::analysis::analyzer::Analyzer;
    use crate::core::error::ErrorKind;
    use crate::engine::indexer::DocumentIndexer;
    use crate::query::ast::Query;
    use crate::schema::schema::{FieldCatalog, FieldConfig, FieldType};
    use crate::search::results::CountRequest;

    fn indexed(id: &str, body: serde_json::Value) -> IndexedDocument {
        let catalog = FieldCatalog::new().with_field(FieldConfig::new("country", FieldType::Text).facet());
        let analyzer = Analyzer::standard();
        DocumentIndexer::new(&catalog, &analyzer)
            .index(&Document::new(id, "books", body))
            .unwrap()
    }

    fn key() -> ShardKey {
        ShardKey::new("books", 0)
    }

    #[test]
    fn snapshots_are_point_in_time() {
        let engine = MemoryEngine::new();
        let writer = engine.open_index_writer(&key(), &IndexSettings::default()).unwrap();

        writer.update_document(indexed("1", json!({"title": "dune"}))).unwrap();
        let before = writer.open_reader().unwrap();
        writer.update_document(indexed("2", json!({"title": "emma"}))).unwrap();
        let after = writer.open_reader().unwrap();

        assert_eq!(before.doc_count(), 1);
        assert_eq!(after.doc_count(), 2);
        assert!(after.generation() > before.generation());
    }

    #[test]
    fn reopen_keeps_only_committed_state() {
        let engine = MemoryEngine::new();
        let writer = engine.open_index_writer(&key(), &IndexSettings::default()).unwrap();
        writer.update_document(indexed("1", json!({}))).unwrap();
        writer.commit().unwrap();
        writer.update_document(indexed("2", json!({}))).unwrap();
        let snapshot = writer.open_reader().unwrap();
        writer.close().unwrap();

        assert_eq!(snapshot.doc_count(), 2);
        assert!(writer.update_document(indexed("3", json!({}))).is_err());

        let reopened = engine.open_index_writer(&key(), &IndexSettings::default()).unwrap();
        assert_eq!(reopened.open_reader().unwrap().doc_count(), 1);
        assert_eq!(engine.commit_count(&key()), 1);
    }

    #[test]
    fn injected_commit_failure_surfaces_as_engine_failure() {
        let engine = MemoryEngine::new();
        let writer = engine.open_index_writer(&key(), &IndexSettings::default()).unwrap();
        engine.fail_commits(&key(), true);

        let err = writer.commit().unwrap_err();
        assert_eq!(err.kind, ErrorKind::EngineFailure);
        assert!(err.context.contains("books"));
    }

    #[test]
    fn search_counts_facets_over_all_matches() {
        let engine = MemoryEngine::new();
        let writer = engine.open_index_writer(&key(), &IndexSettings::default()).unwrap();
        for (id, country) in [("1", "es"), ("2", "fr"), ("3", "es")] {
            writer.update_document(indexed(id, json!({"country": country}))).unwrap();
        }

        let mut search = ShardSearch::new(Query::MatchAll, 1);
        search.count_requests.push(CountRequest { field: "country".to_string(), max_facets: 10 });
        let result = writer.open_reader().unwrap().search(&search).unwrap();

        assert_eq!(result.total_hits, 3);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].unique_id, "1");
        assert_eq!(result.facets[0].counts[0], FacetCount { label: "es".to_string(), count: 2 });
    }

    #[test]
    fn taxonomy_ordinals_are_stable() {
        let engine = MemoryEngine::new();
        let taxonomy = engine.open_taxonomy_writer(&key()).unwrap();
        let first = taxonomy.add_labels("country", &["es".to_string(), "fr".to_string()]).unwrap();
        let again = taxonomy.add_labels("country", &["fr".to_string()]).unwrap();

        assert_eq!(first, vec![0, 1]);
        assert_eq!(again, vec![1]);
        taxonomy.commit().unwrap();
        assert_eq!(engine.committed_taxonomy_size(&key()), 2);
    }
}
