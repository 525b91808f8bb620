use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use crate::core::clock::Clock;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, ShardKey};
use crate::engine::{IndexEngine, ShardSnapshot};
use crate::engine::indexer::DocumentIndexer;
use crate::index::index_config::IndexConfig;
use crate::reader::shard_reader::ShardSearcher;
use crate::writer::writer_group::WriterGroup;

/// Timestamps are stored as millis + 1 so that 0 can mean "never".
fn encode(millis: u64) -> u64 {
    millis.saturating_add(1)
}

fn decode(raw: u64) -> Option<u64> {
    raw.checked_sub(1)
}

/// Owns the writers of one shard and decides when pending changes should be
/// committed and when a fresh reader should be warmed.
///
/// Mutations and commits are serialized by `mutation_lock`. The writer slot
/// itself sits behind a read-mostly lock: mutations, commits and reader opens
/// share it, only close and reopen take it exclusively. Readers therefore
/// never wait on a mutation in progress.
pub struct ShardLifecycle {
    key: ShardKey,
    index_config: Arc<IndexConfig>,
    engine: Arc<dyn IndexEngine>,
    clock: Arc<dyn Clock>,
    writers: RwLock<Option<WriterGroup>>,
    mutation_lock: Mutex<()>,
    write_counter: AtomicU64,
    last_change: AtomicU64,
    last_commit: AtomicU64,
    last_warm: AtomicU64,
    failed: AtomicBool,   // Set by a failed commit until the writer is reopened
}

impl ShardLifecycle {
    pub fn open(
        key: ShardKey,
        index_config: Arc<IndexConfig>,
        engine: Arc<dyn IndexEngine>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let group = WriterGroup::open(engine.as_ref(), &key, &index_config.settings())?;
        info!("Opened writer for shard <{}> of index <{}>", key.shard_number, key.index_name);

        Ok(ShardLifecycle {
            key,
            index_config,
            engine,
            clock,
            writers: RwLock::new(Some(group)),
            mutation_lock: Mutex::new(()),
            write_counter: AtomicU64::new(0),
            last_change: AtomicU64::new(0),
            last_commit: AtomicU64::new(0),
            last_warm: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    /// Indexes or replaces the document keyed by its unique id. Returns true
    /// when the commit interval has been reached; committing is up to the caller.
    pub fn index_document(&self, document: &Document) -> Result<bool> {
        let indexed = DocumentIndexer::new(self.index_config.catalog(), self.index_config.analyzer())
            .index(document)?;
        self.mutate(|group| group.update_document(indexed))
    }

    pub fn delete_document(&self, unique_id: &str) -> Result<bool> {
        self.mutate(|group| group.delete_document(unique_id))
    }

    pub fn delete_all(&self) -> Result<bool> {
        self.mutate(|group| group.delete_all())
    }

    fn mutate<F>(&self, op: F) -> Result<bool>
    where
        F: FnOnce(&WriterGroup) -> Result<()>,
    {
        let _serial = self.mutation_lock.lock();
        let slot = self.writers.read();
        let group = self.writable(&slot)?;

        op(group)?;

        self.last_change.store(encode(self.clock.now_millis()), Ordering::SeqCst);
        let count = self.write_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(count % self.index_config.settings().commit_interval() == 0)
    }

    fn writable<'g>(&self, slot: &'g Option<WriterGroup>) -> Result<&'g WriterGroup> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::ShardUnavailable,
                format!(
                    "writer for shard <{}> of index <{}> failed to commit and must be reopened",
                    self.key.shard_number, self.key.index_name
                ),
            ));
        }
        slot.as_ref()
            .ok_or_else(|| Error::shard_unavailable(&self.key.index_name, self.key.shard_number))
    }

    /// Dirty and quiet for longer than the idle threshold.
    pub fn needs_idle_commit(&self) -> bool {
        let now = self.clock.now_millis();
        let last_change = decode(self.last_change.load(Ordering::SeqCst));
        let last_commit = decode(self.last_commit.load(Ordering::SeqCst));
        let threshold = self.index_config.settings().idle_commit_threshold_ms();

        match last_change {
            None => false,
            Some(change) => {
                now.saturating_sub(change) > threshold
                    && last_commit.is_none_or(|commit| change > commit)
            }
        }
    }

    /// True once per stable commit: never warmed, or the last commit is newer
    /// than both the last change and the last warm, and has aged past the
    /// warm delay.
    pub fn needs_search_warming(&self) -> bool {
        let now = self.clock.now_millis();
        let last_change = decode(self.last_change.load(Ordering::SeqCst));
        let last_commit = decode(self.last_commit.load(Ordering::SeqCst));
        let last_warm = decode(self.last_warm.load(Ordering::SeqCst));

        let Some(warm) = last_warm else {
            return true;
        };
        let (Some(change), Some(commit)) = (last_change, last_commit) else {
            return false;
        };

        let delay = self.index_config.settings().warm_delay_ms();
        change < commit && now.saturating_sub(commit) > delay && commit > warm
    }

    pub fn commit(&self) -> Result<()> {
        let _serial = self.mutation_lock.lock();
        let slot = self.writers.read();
        let group = self.writable(&slot)?;

        info!("Committing shard <{}> for index <{}>", self.key.shard_number, self.key.index_name);
        if let Err(e) = group.commit() {
            self.failed.store(true, Ordering::SeqCst);
            error!("Commit failed for shard <{}> of index <{}>, writer must be reopened: {}",
                self.key.shard_number, self.key.index_name, e);
            return Err(e);
        }

        self.last_commit.fetch_max(encode(self.clock.now_millis()), Ordering::SeqCst);
        Ok(())
    }

    pub fn mark_warmed(&self) {
        self.last_warm.store(encode(self.clock.now_millis()), Ordering::SeqCst);
    }

    /// Point-in-time reader including uncommitted changes. Does not wait for
    /// mutations in progress.
    pub fn open_reader_snapshot(&self) -> Result<ShardSearcher> {
        let snapshot = self.open_snapshot()?;
        let cache_size = self.index_config.settings().shard_query_cache_size;
        Ok(ShardSearcher::new(self.key.clone(), snapshot, cache_size))
    }

    /// Bare engine snapshot, for one-off lookups that need no result cache
    pub fn open_snapshot(&self) -> Result<Arc<dyn ShardSnapshot>> {
        let slot = self.writers.read();
        let group = slot
            .as_ref()
            .ok_or_else(|| Error::shard_unavailable(&self.key.index_name, self.key.shard_number))?;
        group.open_reader()
    }

    /// Applies the current index settings to the open writer. Forgets the
    /// last warm so the next check warms again.
    pub fn update_index_settings(&self) {
        let settings = self.index_config.settings();
        if let Some(group) = self.writers.read().as_ref() {
            group.set_ram_buffer_mb(settings.effective_ram_buffer_mb());
        }
        self.last_warm.store(0, Ordering::SeqCst);
        debug!("Updated settings for shard <{}> of index <{}>: commit interval {}, idle threshold {}ms",
            self.key.shard_number, self.key.index_name,
            settings.commit_interval(), settings.idle_commit_threshold_ms());
    }

    pub fn force_merge(&self, max_segments: usize) -> Result<()> {
        let _serial = self.mutation_lock.lock();
        let slot = self.writers.read();
        let group = self.writable(&slot)?;
        info!("Merging shard <{}> of index <{}> down to {} segment(s)",
            self.key.shard_number, self.key.index_name, max_segments);
        group.force_merge(max_segments)
    }

    /// Replaces the writer with a fresh one over the last committed state.
    /// Uncommitted changes of the old writer are discarded.
    pub fn reopen_writer(&self) -> Result<()> {
        let _serial = self.mutation_lock.lock();
        let mut slot = self.writers.write();

        if let Some(old) = slot.take() {
            if let Err(e) = old.close() {
                warn!("Closing failed writer for shard <{}> of index <{}>: {}",
                    self.key.shard_number, self.key.index_name, e);
            }
        }

        let group = WriterGroup::open(self.engine.as_ref(), &self.key, &self.index_config.settings())?;
        *slot = Some(group);

        // Whatever was dirty before is gone with the old writer
        self.last_change.store(self.last_commit.load(Ordering::SeqCst), Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);
        info!("Reopened writer for shard <{}> of index <{}>", self.key.shard_number, self.key.index_name);
        Ok(())
    }

    /// Releases both writers. Readers already handed out stay valid.
    pub fn close(&self) -> Result<()> {
        let _serial = self.mutation_lock.lock();
        let group = self.writers.write().take();
        match group {
            Some(group) => {
                info!("Closing shard <{}> for index <{}>", self.key.shard_number, self.key.index_name);
                group.close()
            }
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.writers.read().is_some()
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.write_counter.load(Ordering::SeqCst)
    }

    pub fn last_commit_time(&self) -> Option<u64> {
        decode(self.last_commit.load(Ordering::SeqCst))
    }

    pub fn last_change_time(&self) -> Option<u64> {
        decode(self.last_change.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::clock::ManualClock;
    use crate::core::config::IndexSettings;
    use crate::engine::memory::MemoryEngine;
    use crate::schema::schema::{FieldCatalog, FieldConfig, FieldType};

    struct Fixture {
        engine: Arc<MemoryEngine>,
        clock: Arc<ManualClock>,
        config: Arc<IndexConfig>,
        manager: ShardLifecycle,
    }

    fn fixture(settings: IndexSettings) -> Fixture {
        let engine = Arc::new(MemoryEngine::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let catalog = FieldCatalog::new().with_field(FieldConfig::new("year", FieldType::Int32));
        let config = Arc::new(IndexConfig::new("books", catalog, settings));
        let manager = ShardLifecycle::open(
            ShardKey::new("books", 0),
            config.clone(),
            engine.clone(),
            clock.clone(),
        ).unwrap();
        Fixture { engine, clock, config, manager }
    }

    fn settings(interval: u64, idle_secs: u64) -> IndexSettings {
        IndexSettings {
            shard_commit_interval: interval,
            idle_time_without_commit_secs: idle_secs,
            ..IndexSettings::default()
        }
    }

    fn doc(id: &str) -> Document {
        Document::new(id, "books", json!({"title": "dune", "year": 1965}))
    }

    #[test]
    fn commit_interval_fires_on_every_nth_mutation() {
        let f = fixture(settings(3, 10));
        let due: Vec<bool> = (0..7)
            .map(|i| f.manager.index_document(&doc(&i.to_string())).unwrap())
            .collect();
        assert_eq!(due, vec![false, false, true, false, false, true, false]);
        assert_eq!(f.manager.write_count(), 7);
    }

    #[test]
    fn idle_commit_after_quiet_period() {
        let f = fixture(settings(100, 10));
        assert!(!f.manager.needs_idle_commit());

        f.manager.index_document(&doc("1")).unwrap();
        f.clock.advance(10_000);
        assert!(!f.manager.needs_idle_commit());
        f.clock.advance(1);
        assert!(f.manager.needs_idle_commit());

        f.manager.commit().unwrap();
        assert!(!f.manager.needs_idle_commit());
        f.clock.advance(60_000);
        assert!(!f.manager.needs_idle_commit());
    }

    #[test]
    fn warming_happens_once_per_stable_commit() {
        let f = fixture(settings(100, 5));
        assert!(f.manager.needs_search_warming());
        f.manager.mark_warmed();
        assert!(!f.manager.needs_search_warming());

        f.clock.advance(10);
        f.manager.index_document(&doc("1")).unwrap();
        f.clock.advance(10);
        f.manager.commit().unwrap();
        assert!(!f.manager.needs_search_warming());

        f.clock.advance(5_001);
        assert!(f.manager.needs_search_warming());
        f.manager.mark_warmed();
        assert!(!f.manager.needs_search_warming());

        // A later change without a commit keeps the shard unwarmed
        f.clock.advance(10);
        f.manager.index_document(&doc("2")).unwrap();
        f.clock.advance(60_000);
        assert!(!f.manager.needs_search_warming());
    }

    #[test]
    fn settings_update_resets_warm_state_and_is_reread() {
        let f = fixture(settings(100, 5));
        f.manager.mark_warmed();
        assert!(!f.manager.needs_search_warming());

        f.config.update_settings(settings(2, 5)).unwrap();
        f.manager.update_index_settings();
        assert!(f.manager.needs_search_warming());

        assert!(!f.manager.index_document(&doc("1")).unwrap());
        assert!(f.manager.index_document(&doc("2")).unwrap());
    }

    #[test]
    fn failed_mutation_does_not_count() {
        let f = fixture(settings(1, 0));
        let err = f.manager.index_document(&Document::new("1", "books", json!({"year": "soon"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRequest);

        f.engine.fail_mutations(f.manager.key(), true);
        let err = f.manager.delete_document("1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::EngineFailure);

        assert_eq!(f.manager.write_count(), 0);
        assert_eq!(f.manager.last_change_time(), None);
        f.clock.advance(1_000);
        assert!(!f.manager.needs_idle_commit());
    }

    #[test]
    fn commit_failure_blocks_writes_until_reopen() {
        let f = fixture(settings(100, 10));
        f.manager.index_document(&doc("1")).unwrap();
        f.manager.commit().unwrap();
        f.manager.index_document(&doc("2")).unwrap();

        f.engine.fail_commits(f.manager.key(), true);
        let err = f.manager.commit().unwrap_err();
        assert_eq!(err.kind, ErrorKind::EngineFailure);
        assert!(f.manager.has_failed());

        let err = f.manager.index_document(&doc("3")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShardUnavailable);

        f.engine.fail_commits(f.manager.key(), false);
        f.manager.reopen_writer().unwrap();
        assert!(!f.manager.has_failed());

        // Only the committed document survived the reopen
        assert_eq!(f.manager.open_reader_snapshot().unwrap().doc_count(), 1);
        f.manager.index_document(&doc("3")).unwrap();
        f.manager.commit().unwrap();
    }

    #[test]
    fn snapshots_outlive_close() {
        let f = fixture(settings(100, 10));
        f.manager.index_document(&doc("1")).unwrap();
        let reader = f.manager.open_reader_snapshot().unwrap();

        f.manager.close().unwrap();
        assert!(!f.manager.is_open());
        assert_eq!(reader.doc_count(), 1);

        let err = f.manager.index_document(&doc("2")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShardUnavailable);
        assert!(f.manager.open_reader_snapshot().is_err());
        assert!(f.manager.commit().is_err());
    }

    #[test]
    fn last_commit_time_never_moves_backwards() {
        let f = fixture(settings(100, 10));
        f.manager.commit().unwrap();
        let first = f.manager.last_commit_time().unwrap();

        f.clock.set(10);
        f.manager.commit().unwrap();
        assert_eq!(f.manager.last_commit_time(), Some(first));
    }

    #[test]
    fn concurrent_mutations_are_all_counted() {
        let f = fixture(settings(1_000, 10));
        std::thread::scope(|scope| {
            for t in 0..4 {
                let manager = &f.manager;
                scope.spawn(move || {
                    for i in 0..50 {
                        manager.index_document(&doc(&format!("{}-{}", t, i))).unwrap();
                        if i % 10 == 0 {
                            manager.open_reader_snapshot().unwrap();
                        }
                    }
                });
            }
        });

        assert_eq!(f.manager.write_count(), 200);
        f.manager.commit().unwrap();
        assert_eq!(f.engine.committed_doc_count(f.manager.key()), 200);
    }
}
