use std::collections::HashMap;
use std::sync::Arc;
use futures::future::{join_all, try_join_all};
use parking_lot::RwLock;
use tracing::{debug, error, info};
use crate::cluster::client::PeerClient;
use crate::cluster::membership::{replica_targets, IndexMapping, MembershipSnapshot, Node, ReplicaPreference};
use crate::cluster::operations::{DeleteOperation, FetchOperation, ShardQueryOperation, StoreOperation};
use crate::cluster::router::NodeRouter;
use crate::core::clock::Clock;
use crate::core::config::{Config, IndexSettings};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ShardKey;
use crate::engine::{IndexEngine, ShardSearch};
use crate::index::index_config::{IndexDefinition, IndexConfig};
use crate::index::maintenance::MaintenanceTarget;
use crate::index::sharded_index::{shard_for_id, ShardedIndex};
use crate::node::requests::{
    ClearRequest, ClearResponse, DeleteRequest, DeleteResponse, FetchRequest, FetchResponse,
    OptimizeRequest, OptimizeResponse, QueryRequest, QueryResponse, ShardQueryRequest,
    ShardQueryResponse, StoreRequest, StoreResponse,
};
use crate::query::compiler::{CompileOptions, QueryField};
use crate::search::results::{merge_shard_results, ResultCursor, ShardQueryResult};

/// Entry point for every request a node serves. Owns the locally hosted
/// shards of each index and routes id-addressed requests to the node that
/// holds the owning shard.
pub struct IndexManager {
    config: Config,
    this_node: Node,
    membership: RwLock<MembershipSnapshot>,
    indexes: RwLock<HashMap<String, Arc<ShardedIndex>>>,
    client: Arc<dyn PeerClient>,
    router: NodeRouter,
    engine: Arc<dyn IndexEngine>,
    clock: Arc<dyn Clock>,
}

impl IndexManager {
    pub fn new(
        config: Config,
        engine: Arc<dyn IndexEngine>,
        clock: Arc<dyn Clock>,
        client: Arc<dyn PeerClient>,
    ) -> Self {
        let this_node = Node::new(&config.node_id, &config.address);
        info!("Starting index manager on node <{}> at {}", this_node.id, this_node.address);

        IndexManager {
            router: NodeRouter::new(config.remote_request_timeout()),
            membership: RwLock::new(MembershipSnapshot::new(this_node.clone())),
            indexes: RwLock::new(HashMap::new()),
            this_node,
            config,
            client,
            engine,
            clock,
        }
    }

    pub fn node(&self) -> &Node {
        &self.this_node
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn membership(&self) -> MembershipSnapshot {
        self.membership.read().clone()
    }

    /// Replaces the set of reachable peers. Index mappings are kept.
    pub fn set_reachable_nodes(&self, nodes: Vec<Node>) {
        let mut membership = self.membership.write();
        membership.other_nodes = nodes.into_iter().filter(|n| n.id != self.this_node.id).collect();
    }

    /// Creates an index from its definition and opens the shards `mapping`
    /// assigns to this node. Every node of the cluster gets the same call.
    pub fn create_index(&self, definition: IndexDefinition, mapping: IndexMapping) -> Result<()> {
        if mapping.index_name != definition.index_name
            || mapping.number_of_shards != definition.settings.number_of_shards
        {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("mapping for <{}> does not match the definition of index <{}>",
                    mapping.index_name, definition.index_name),
            ));
        }
        if self.indexes.read().contains_key(&definition.index_name) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("index <{}> already exists", definition.index_name),
            ));
        }

        let config = Arc::new(IndexConfig::from_definition(definition)?);
        let local_shards = mapping.shards_owned_by(&self.this_node.id);
        let index = ShardedIndex::open(config, self.engine.clone(), self.clock.clone(), &local_shards)?;
        info!("Created index <{}> with local shards {:?}", mapping.index_name, local_shards);

        self.indexes.write().insert(mapping.index_name.clone(), Arc::new(index));
        self.membership.write().mappings.insert(mapping.index_name.clone(), mapping);
        Ok(())
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn index(&self, index_name: &str) -> Result<Arc<ShardedIndex>> {
        self.indexes
            .read()
            .get(index_name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("index <{}> does not exist", index_name)))
    }

    fn shard_key(snapshot: &MembershipSnapshot, index_name: &str, unique_id: &str) -> Result<ShardKey> {
        if unique_id.is_empty() {
            return Err(Error::malformed(format!("request for index <{}> has no unique id", index_name)));
        }
        let mapping = snapshot.mapping(index_name)?;
        Ok(ShardKey::new(index_name, shard_for_id(unique_id, mapping.number_of_shards)))
    }

    /// Writes go to the primary first. Once it has applied the write, the
    /// same request is applied to every reachable replica.
    pub async fn store(&self, mut request: StoreRequest) -> Result<StoreResponse> {
        if request.document.timestamp == 0 {
            request.document.timestamp = self.clock.now_millis() as i64;
        }
        let snapshot = self.membership();
        let key = Self::shard_key(&snapshot, &request.document.index_name, &request.document.unique_id)?;
        let operation = StoreOperation::new(self, self.client.as_ref());
        let response = self.router.route(&snapshot, &key, ReplicaPreference::PrimaryOnly, &operation, &request).await?;
        self.router.replicate(&replica_targets(&snapshot, &key)?, &key, &operation, &request).await;
        Ok(response)
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse> {
        let snapshot = self.membership();
        let key = Self::shard_key(&snapshot, &request.index_name, &request.unique_id)?;
        let operation = DeleteOperation::new(self, self.client.as_ref());
        let response = self.router.route(&snapshot, &key, ReplicaPreference::PrimaryOnly, &operation, &request).await?;
        self.router.replicate(&replica_targets(&snapshot, &key)?, &key, &operation, &request).await;
        Ok(response)
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let snapshot = self.membership();
        let key = Self::shard_key(&snapshot, &request.index_name, &request.unique_id)?;
        let operation = FetchOperation::new(self, self.client.as_ref());
        self.router.route(&snapshot, &key, request.preference, &operation, &request).await
    }

    /// Compiles the query once per index, runs it on every shard of every
    /// requested index and merges the partial results.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        if request.indexes.is_empty() {
            return Err(Error::malformed("query names no index".to_string()));
        }

        let snapshot = self.membership();
        let top_n = match request.last_result {
            Some(_) => request.amount,
            None => request.start.saturating_add(request.amount),
        };

        let mut shard_requests = Vec::new();
        for index_name in &request.indexes {
            let index = self.index(index_name)?;
            let config = index.config();
            if let Some(sort) = &request.sort {
                if !config.catalog().get(&sort.field).is_some_and(|f| f.sortable) {
                    return Err(Error::malformed(format!(
                        "field <{}> of index <{}> is not sortable", sort.field, index_name
                    )));
                }
            }

            let query = config.compile(&request.query, &self.compile_options(config, &request)?)?;
            debug!(index = %index_name, query = ?query, "compiled query");

            let search = ShardSearch {
                query,
                top_n,
                sort: request.sort.clone(),
                count_requests: request.count_requests.clone(),
                after: request.last_result.clone(),
                fetch_type: request.fetch_type,
            };
            let mapping = snapshot.mapping(index_name)?;
            for shard_number in 0..mapping.number_of_shards {
                shard_requests.push(ShardQueryRequest {
                    index_name: index_name.clone(),
                    shard_number,
                    search: search.clone(),
                });
            }
        }

        let operation = ShardQueryOperation::new(self, self.client.as_ref());
        let preference = request.preference;
        let partials = try_join_all(shard_requests.iter().map(|shard_request| {
            let key = ShardKey::new(&shard_request.index_name, shard_request.shard_number);
            let snapshot = &snapshot;
            let operation = &operation;
            async move {
                self.router.route(snapshot, &key, preference, operation, shard_request).await
            }
        }))
        .await?;

        let results: Vec<ShardQueryResult> = partials.into_iter().map(|p| p.result).collect();
        let start = if request.last_result.is_some() { 0 } else { request.start };
        let merged = merge_shard_results(results, request.sort.as_ref(), start, request.amount, &request.count_requests);

        Ok(QueryResponse {
            total_hits: merged.total_hits,
            last_result: merged.hits.last().map(ResultCursor::from_result),
            results: merged.hits,
            facet_counts: merged.facets,
        })
    }

    fn compile_options(&self, config: &IndexConfig, request: &QueryRequest) -> Result<CompileOptions> {
        let default_fields = if request.query_fields.is_empty() {
            config.default_compile_options()?.default_fields
        } else {
            request.query_fields.iter().map(|f| QueryField::parse(f)).collect::<Result<_>>()?
        };
        Ok(CompileOptions {
            default_fields,
            default_operator: request.default_operator,
            minimum_should_match: request.minimum_should_match,
            dismax_tie_breaker: request.dismax_tie_breaker,
        })
    }

    pub fn internal_store(&self, request: &StoreRequest) -> Result<StoreResponse> {
        let document = &request.document;
        let index = self.index(&document.index_name)?;
        index.store(document)?;
        Ok(StoreResponse {
            index_name: document.index_name.clone(),
            unique_id: document.unique_id.clone(),
            shard_number: index.shard_for_id(&document.unique_id),
        })
    }

    pub fn internal_delete(&self, request: &DeleteRequest) -> Result<DeleteResponse> {
        let index = self.index(&request.index_name)?;
        index.delete(&request.unique_id)?;
        Ok(DeleteResponse {
            index_name: request.index_name.clone(),
            unique_id: request.unique_id.clone(),
            shard_number: index.shard_for_id(&request.unique_id),
        })
    }

    pub fn internal_fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let document = self.index(&request.index_name)?.fetch(&request.unique_id, request.fetch_type)?;
        Ok(FetchResponse { document })
    }

    pub fn internal_shard_query(&self, request: &ShardQueryRequest) -> Result<ShardQueryResponse> {
        let result = self.index(&request.index_name)?.shard_query(request.shard_number, &request.search)?;
        Ok(ShardQueryResponse { result })
    }

    /// Removes every document of the index on all nodes holding its shards.
    pub async fn clear(&self, request: ClearRequest) -> Result<ClearResponse> {
        self.broadcast(&request.index_name, "clear", |peer| {
            let request = request.clone();
            async move { self.client.clear(&peer, &request).await.map(|_| ()) }
        })
        .await?;
        self.internal_clear(&request)
    }

    pub fn internal_clear(&self, request: &ClearRequest) -> Result<ClearResponse> {
        self.index(&request.index_name)?.clear()?;
        Ok(ClearResponse { index_name: request.index_name.clone() })
    }

    /// Merges every shard of the index down to one segment, cluster wide.
    pub async fn optimize(&self, request: OptimizeRequest) -> Result<OptimizeResponse> {
        self.broadcast(&request.index_name, "optimize", |peer| {
            let request = request.clone();
            async move { self.client.optimize(&peer, &request).await.map(|_| ()) }
        })
        .await?;
        self.internal_optimize(&request)
    }

    pub fn internal_optimize(&self, request: &OptimizeRequest) -> Result<OptimizeResponse> {
        self.index(&request.index_name)?.optimize()?;
        Ok(OptimizeResponse { index_name: request.index_name.clone() })
    }

    /// Sends to every reachable peer holding a shard of the index. All peers
    /// are tried; the first failure is returned.
    async fn broadcast<F, Fut>(&self, index_name: &str, action: &str, send: F) -> Result<()>
    where
        F: Fn(Node) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let snapshot = self.membership();
        let mapping = snapshot.mapping(index_name)?;
        let peers: Vec<Node> = snapshot
            .other_nodes
            .iter()
            .filter(|peer| !mapping.shards_owned_by(&peer.id).is_empty())
            .cloned()
            .collect();

        let timeout = self.router.timeout();
        let outcomes = join_all(peers.into_iter().map(|peer| {
            let peer_id = peer.id.clone();
            let call = send(peer);
            async move {
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::node_unreachable(format!("node <{}> did not answer {}", peer_id, action))),
                };
                outcome.map_err(|e| {
                    error!("Failed to {} index <{}> on node <{}>: {}", action, index_name, peer_id, e);
                    e
                })
            }
        }))
        .await;

        outcomes.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    pub fn update_index_settings(&self, index_name: &str, settings: IndexSettings) -> Result<()> {
        self.index(index_name)?.update_settings(settings)
    }

    pub fn close(&self) -> Result<()> {
        let indexes: Vec<Arc<ShardedIndex>> = self.indexes.write().drain().map(|(_, index)| index).collect();
        let mut first_error = None;
        for index in indexes {
            if let Err(e) = index.close() {
                first_error.get_or_insert(e);
            }
        }
        info!("Closed index manager on node <{}>", self.this_node.id);
        first_error.map_or(Ok(()), Err)
    }

    fn local_indexes(&self) -> Vec<Arc<ShardedIndex>> {
        self.indexes.read().values().cloned().collect()
    }
}

impl MaintenanceTarget for IndexManager {
    fn run_maintenance(&self) -> Result<()> {
        let mut first_error = None;
        for index in self.local_indexes() {
            if let Err(e) = index.run_maintenance() {
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
    use crate::cluster::client::LoopbackClient;
    use crate::cluster::membership::ShardAssignment;
    use crate::core::clock::ManualClock;
    use crate::core::types::{Document, FetchType};
    use crate::engine::memory::MemoryEngine;
    use crate::schema::schema::{FieldConfig, FieldType};

    fn definition(shards: u32) -> IndexDefinition {
        IndexDefinition {
            index_name: "books".to_string(),
            fields: vec![
                FieldConfig::new("title", FieldType::Text),
                FieldConfig::new("year", FieldType::Int32).sortable(),
            ],
            settings: IndexSettings {
                number_of_shards: shards,
                default_search_fields: vec!["title".to_string()],
                ..IndexSettings::default()
            },
        }
    }

    fn single_node(shards: u32) -> IndexManager {
        let config = Config { node_id: "a".to_string(), ..Config::default() };
        let manager = IndexManager::new(
            config,
            Arc::new(MemoryEngine::new()),
            Arc::new(ManualClock::new(1_000)),
            Arc::new(LoopbackClient::new()),
        );
        manager.create_index(definition(shards), IndexMapping::single_node("books", shards, "a")).unwrap();
        manager
    }

    async fn store(manager: &IndexManager, id: &str, title: &str, year: i32) {
        let doc = Document::new(id, "books", json!({"title": title, "year": year}));
        manager.store(StoreRequest::new(doc)).await.unwrap();
    }

    #[tokio::test]
    async fn store_fetch_delete_round_trip() {
        let manager = single_node(3);
        store(&manager, "1", "dune", 1965).await;

        let fetched = manager.fetch(FetchRequest::new("books", "1")).await.unwrap();
        let document = fetched.document.unwrap();
        assert_eq!(document.body["title"], "dune");
        assert_eq!(document.timestamp, 1_000);

        manager.delete(DeleteRequest::new("books", "1")).await.unwrap();
        assert!(manager.fetch(FetchRequest::new("books", "1")).await.unwrap().document.is_none());
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let manager = single_node(1);
        let err = manager.delete(DeleteRequest::new("books", "")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRequest);

        let err = manager.fetch(FetchRequest::new("films", "1")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn query_merges_all_shards() {
        let manager = single_node(4);
        for (i, title) in ["dune", "dune messiah", "children of dune", "emma"].iter().enumerate() {
            store(&manager, &i.to_string(), title, 1960 + i as i32).await;
        }
        manager.index("books").unwrap().commit().unwrap();

        let response = manager.query(QueryRequest::new("books", "dune")).await.unwrap();
        assert_eq!(response.total_hits, 3);
        assert_eq!(response.results.len(), 3);

        let mut request = QueryRequest::new("books", "*:*");
        request.sort = Some(crate::search::results::SortField::descending("year"));
        request.fetch_type = FetchType::None;
        let response = manager.query(request).await.unwrap();
        let ids: Vec<&str> = response.results.iter().map(|r| r.unique_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1", "0"]);
        assert!(response.results.iter().all(|r| r.document.is_none()));
    }

    #[tokio::test]
    async fn cursor_pages_through_results() {
        let manager = single_node(3);
        for i in 0..7 {
            store(&manager, &format!("doc-{}", i), "dune", 2000 + i).await;
        }
        manager.index("books").unwrap().commit().unwrap();

        let mut seen = Vec::new();
        let mut request = QueryRequest::new("books", "dune");
        request.amount = 3;
        loop {
            let response = manager.query(request.clone()).await.unwrap();
            if response.results.is_empty() {
                break;
            }
            seen.extend(response.results.iter().map(|r| r.unique_id.clone()));
            request.last_result = response.last_result;
        }

        let mut expected: Vec<String> = (0..7).map(|i| format!("doc-{}", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn huge_amount_returns_every_hit() {
        let manager = single_node(2);
        for i in 0..3 {
            store(&manager, &i.to_string(), "dune", 1960 + i).await;
        }
        manager.index("books").unwrap().commit().unwrap();

        let mut request = QueryRequest::new("books", "dune");
        request.amount = usize::MAX;
        let response = manager.query(request.clone()).await.unwrap();
        assert_eq!(response.results.len(), 3);

        request.start = 1;
        let response = manager.query(request).await.unwrap();
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn sort_on_unsortable_field_is_rejected() {
        let manager = single_node(1);
        let mut request = QueryRequest::new("books", "dune");
        request.sort = Some(crate::search::results::SortField::ascending("title"));
        let err = manager.query(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedRequest);
    }

    #[tokio::test]
    async fn clear_and_maintenance() {
        let manager = single_node(2);
        store(&manager, "1", "dune", 1965).await;
        manager.clear(ClearRequest { index_name: "books".to_string() }).await.unwrap();
        assert!(manager.fetch(FetchRequest::new("books", "1")).await.unwrap().document.is_none());

        manager.run_maintenance().unwrap();
        manager.close().unwrap();
        assert!(manager.index_names().is_empty());
    }

    #[test]
    fn mapping_must_match_definition() {
        let manager = single_node(1);
        let mapping = IndexMapping::new("books", 2).with_shard(0, ShardAssignment::new("a"));
        let mut definition = definition(1);
        definition.index_name = "films".to_string();
        assert!(manager.create_index(definition, mapping).is_err());
        assert!(manager.create_index(self::definition(1), IndexMapping::single_node("books", 1, "a")).is_err());
    }
}
