/// Example: three nodes in one process
///
/// Each node hosts the primary of one shard and a replica of another.
/// Requests entering at any node are routed to the owning node, queries fan
/// out to every shard, writes are copied to replicas, and a partitioned
/// primary is skipped in favor of a replica when the request's preference
/// allows it.

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use shardex::cluster::client::LoopbackClient;
use shardex::cluster::membership::{IndexMapping, Node, ReplicaPreference, ShardAssignment};
use shardex::core::clock::SystemClock;
use shardex::core::config::{Config, IndexSettings};
use shardex::core::types::Document;
use shardex::engine::memory::MemoryEngine;
use shardex::index::index_config::IndexDefinition;
use shardex::index::maintenance::spawn_maintenance;
use shardex::node::handlers::{QueryHandler, RequestHandler, StoreHandler};
use shardex::node::index_manager::IndexManager;
use shardex::node::requests::{FetchRequest, QueryRequest, StoreRequest};
use shardex::schema::schema::{FieldConfig, FieldType};

const NODES: [&str; 3] = ["node-a", "node-b", "node-c"];

fn definition() -> IndexDefinition {
    IndexDefinition {
        index_name: "books".to_string(),
        fields: vec![
            FieldConfig::new("title", FieldType::Text),
            FieldConfig::new("year", FieldType::Int32).sortable(),
            FieldConfig::new("genre", FieldType::Text).facet(),
        ],
        settings: IndexSettings {
            number_of_shards: 3,
            shard_commit_interval: 4,
            idle_time_without_commit_secs: 1,
            default_search_fields: vec!["title^2".to_string(), "genre".to_string()],
            ..IndexSettings::default()
        },
    }
}

/// Shard i: primary on node i, replica on node i + 1
fn mapping() -> IndexMapping {
    (0..3u32).fold(IndexMapping::new("books", 3), |mapping, shard| {
        let primary = NODES[shard as usize];
        let replica = NODES[(shard as usize + 1) % 3];
        mapping.with_shard(shard, ShardAssignment::new(primary).with_replica(replica))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Start three managers sharing one in-process transport
    let client = Arc::new(LoopbackClient::new());
    let mut managers = Vec::new();
    for (i, id) in NODES.iter().enumerate() {
        let config = Config {
            node_id: id.to_string(),
            address: format!("127.0.0.1:{}", 32191 + i),
            remote_request_timeout_ms: 200,
            ..Config::default()
        };
        let manager = Arc::new(IndexManager::new(config, Arc::new(MemoryEngine::new()), Arc::new(SystemClock), client.clone()));
        client.register(&manager);
        managers.push(manager);
    }

    let nodes: Vec<Node> = managers.iter().map(|m| m.node().clone()).collect();
    for manager in &managers {
        manager.set_reachable_nodes(nodes.clone());
        manager.create_index(definition(), mapping())?;
    }

    let maintenance = spawn_maintenance(managers[0].clone(), Duration::from_millis(250));

    // 2. Store through node-a; documents land on the owning primaries
    let store = StoreHandler::new(managers[0].clone());
    let books = [
        ("1", "Dune", 1965, "science fiction"),
        ("2", "Dune Messiah", 1969, "science fiction"),
        ("3", "Emma", 1815, "romance"),
        ("4", "Foundation", 1951, "science fiction"),
        ("5", "Persuasion", 1817, "romance"),
        ("6", "Hyperion", 1989, "science fiction"),
    ];
    for (id, title, year, genre) in books {
        let doc = Document::new(id, "books", json!({"title": title, "year": year, "genre": genre}));
        let stored = store.handle_call(StoreRequest::new(doc)).await?;
        println!("stored <{}> on shard {}", stored.unique_id, stored.shard_number);
    }
    for manager in &managers {
        manager.index("books")?.commit()?;
    }

    // 3. Query through node-b; every shard answers
    let query = QueryHandler::new(managers[1].clone());
    let mut request = QueryRequest::new("books", "dune OR foundation");
    request.count_requests = vec![shardex::search::results::CountRequest { field: "genre".to_string(), max_facets: 5 }];
    let response = query.handle_call(request).await?;
    println!("\n{} hit(s):", response.total_hits);
    for hit in &response.results {
        println!("  {:>6.3}  {}  (shard {})", hit.score, hit.unique_id, hit.shard_number);
    }
    for facet in &response.facet_counts {
        println!("  facet {}: {:?}", facet.field, facet.counts);
    }

    // 4. Page through everything, oldest first, two at a time
    let mut request = QueryRequest::new("books", "*:*");
    request.sort = Some(shardex::search::results::SortField::ascending("year"));
    request.amount = 2;
    println!("\nby year:");
    loop {
        let page = query.handle_call(request.clone()).await?;
        if page.results.is_empty() {
            break;
        }
        for hit in &page.results {
            println!("  {}", hit.unique_id);
        }
        request.last_result = page.last_result;
    }

    // 5. Partition node-c. Writes to its shard fail, reads may use the replica.
    let id_on_c = (0..100)
        .map(|i| format!("extra-{}", i))
        .find(|id| shardex::index::sharded_index::shard_for_id(id, 3) == 2)
        .ok_or("no id maps to shard 2")?;
    let doc = Document::new(&id_on_c, "books", json!({"title": "Ubik", "year": 1969}));
    store.handle_call(StoreRequest::new(doc)).await?;

    client.set_unreachable("node-c", true);
    let doc = Document::new(&id_on_c, "books", json!({"title": "Ubik", "year": 1970}));
    match store.handle_call(StoreRequest::new(doc)).await {
        Ok(_) => println!("\nunexpected: store to partitioned primary succeeded"),
        Err(e) => println!("\nstore while node-c is partitioned: {}", e),
    }

    let mut fetch = FetchRequest::new("books", &id_on_c);
    fetch.preference = ReplicaPreference::PrimaryPreferred;
    let fetched = managers[1].fetch(fetch).await?;
    let year = fetched.document.map(|d| d.body["year"].clone());
    println!("fetch served by replica of shard 2, year = {:?}", year);

    client.set_unreachable("node-c", false);

    // 6. Shut down
    maintenance.stop().await;
    for manager in &managers {
        manager.close()?;
    }
    Ok(())
}
