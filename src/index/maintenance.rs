use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};
use crate::core::error::Result;
use crate::index::sharded_index::ShardedIndex;

/// Something that knows how to run one maintenance pass over its shards
pub trait MaintenanceTarget: Send + Sync + 'static {
    fn run_maintenance(&self) -> Result<()>;
}

impl MaintenanceTarget for ShardedIndex {
    fn run_maintenance(&self) -> Result<()> {
        ShardedIndex::run_maintenance(self)
    }
}

/// Handle on a running maintenance loop
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stops the loop after the pass in progress, if any, has finished.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Maintenance task ended abnormally: {}", e);
        }
    }
}

/// Spawns a loop that runs a maintenance pass every `interval`. Passes run on
/// the blocking pool since commits wait on engine I/O.
pub fn spawn_maintenance<T: MaintenanceTarget>(target: Arc<T>, interval: Duration) -> MaintenanceHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            let pass_target = target.clone();
            match tokio::task::spawn_blocking(move || pass_target.run_maintenance()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Maintenance pass failed: {}", e),
                Err(e) => error!("Maintenance pass panicked: {}", e),
            }
        }
        debug!("Maintenance loop stopped");
    });

    MaintenanceHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::clock::ManualClock;
    use crate::core::config::IndexSettings;
    use crate::core::types::{Document, ShardKey};
    use crate::engine::memory::MemoryEngine;
    use crate::index::index_config::IndexConfig;
    use crate::schema::schema::FieldCatalog;

    #[tokio::test]
    async fn loop_idle_commits_quiet_shards() {
        let engine = Arc::new(MemoryEngine::new());
        let clock = Arc::new(ManualClock::new(0));
        let settings = IndexSettings { idle_time_without_commit_secs: 1, ..IndexSettings::default() };
        let config = Arc::new(IndexConfig::new("books", FieldCatalog::new(), settings));
        let index = Arc::new(ShardedIndex::open(config, engine.clone(), clock.clone(), &[0]).unwrap());

        index.store(&Document::new("1", "books", json!({"title": "dune"}))).unwrap();
        clock.advance(1_001);

        let handle = spawn_maintenance(index.clone(), Duration::from_millis(5));
        let key = ShardKey::new("books", 0);
        for _ in 0..200 {
            if engine.commit_count(&key) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop().await;

        assert_eq!(engine.commit_count(&key), 1);
        assert_eq!(index.shard(0).unwrap().reader().doc_count(), 1);
    }
}
