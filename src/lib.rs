pub mod core;
pub mod schema;
pub mod analysis;
pub mod query;
pub mod engine;
pub mod search;
pub mod writer;
pub mod reader;
pub mod index;
pub mod cluster;
pub mod node;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                           SHARDEX REQUEST FLOW                               │
└──────────────────────────────────────────────────────────────────────────────┘

  client ──► node::handlers::*Handler ──► node::IndexManager
                                              │
                 ┌────────────────────────────┼───────────────────────────┐
                 │ store / delete / fetch     │ query                     │
                 │ shard_for_id(id)           │ QueryCompiler (per index) │
                 ▼                            ▼                           │
        cluster::NodeRouter ◄── one routed ShardQuery per shard ──────────┘
        │ candidate_nodes(snapshot, shard, preference)
        │ local  ──► process_internal ──► IndexManager::internal_*
        │ remote ──► process_external ──► PeerClient (timeout bounded)
        │ NodeUnreachable ⇒ next candidate, anything else ⇒ caller
        ▼
  index::ShardedIndex ─► index::IndexShard
                           │
         ┌─────────────────┴──────────────────┐
         ▼                                    ▼
  writer::ShardLifecycle                reader::ShardSearcher
  • write_counter / commit interval     • Arc<dyn ShardSnapshot>
  • last_change / last_commit / warm    • QueryCache (LRU)
  • WriterGroup (index + taxonomy)
         │
         ▼
  engine::IndexEngine ── engine::memory::MemoryEngine

  index::maintenance ── tokio interval ──► run_maintenance()
                                            idle commit, then warming
*/
