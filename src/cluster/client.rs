use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;
use crate::cluster::membership::Node;
use crate::core::error::{Error, Result};
use crate::node::index_manager::IndexManager;
use crate::node::requests::{
    ClearRequest, ClearResponse, DeleteRequest, DeleteResponse, FetchRequest, FetchResponse,
    OptimizeRequest, OptimizeResponse, ShardQueryRequest, ShardQueryResponse, StoreRequest, StoreResponse,
};

/// Executes a request on a remote node's local shards. Transport failures
/// must come back as `NodeUnreachable` so the router can fail over.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn store(&self, node: &Node, request: &StoreRequest) -> Result<StoreResponse>;

    async fn delete(&self, node: &Node, request: &DeleteRequest) -> Result<DeleteResponse>;

    async fn fetch(&self, node: &Node, request: &FetchRequest) -> Result<FetchResponse>;

    async fn shard_query(&self, node: &Node, request: &ShardQueryRequest) -> Result<ShardQueryResponse>;

    async fn clear(&self, node: &Node, request: &ClearRequest) -> Result<ClearResponse>;

    async fn optimize(&self, node: &Node, request: &OptimizeRequest) -> Result<OptimizeResponse>;
}

/// In-process transport between managers living in the same process.
/// Requests and responses pass through JSON, like they would on the wire.
#[derive(Default)]
pub struct LoopbackClient {
    nodes: RwLock<HashMap<String, Weak<IndexManager>>>,
    unreachable: RwLock<HashSet<String>>,
    latency: RwLock<HashMap<String, Duration>>,
}

impl LoopbackClient {
    pub fn new() -> Self {
        LoopbackClient::default()
    }

    pub fn register(&self, manager: &Arc<IndexManager>) {
        self.nodes.write().insert(manager.node().id.clone(), Arc::downgrade(manager));
    }

    /// Simulates a partition: calls to the node fail as unreachable.
    pub fn set_unreachable(&self, node_id: &str, unreachable: bool) {
        let mut nodes = self.unreachable.write();
        if unreachable {
            nodes.insert(node_id.to_string());
        } else {
            nodes.remove(node_id);
        }
    }

    /// Delay added before every call to the node
    pub fn set_latency(&self, node_id: &str, latency: Duration) {
        self.latency.write().insert(node_id.to_string(), latency);
    }

    async fn connect(&self, node: &Node) -> Result<Arc<IndexManager>> {
        if self.unreachable.read().contains(&node.id) {
            return Err(Error::node_unreachable(format!("node <{}> at {} is unreachable", node.id, node.address)));
        }

        let latency = self.latency.read().get(&node.id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.nodes
            .read()
            .get(&node.id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::node_unreachable(format!("node <{}> at {} is not running", node.id, node.address)))
    }
}

fn over_wire<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
    let encoded = serde_json::to_vec(value)?;
    trace!("loopback message of {} bytes", encoded.len());
    Ok(serde_json::from_slice(&encoded)?)
}

#[async_trait]
impl PeerClient for LoopbackClient {
    async fn store(&self, node: &Node, request: &StoreRequest) -> Result<StoreResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_store(&over_wire(request)?)?)
    }

    async fn delete(&self, node: &Node, request: &DeleteRequest) -> Result<DeleteResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_delete(&over_wire(request)?)?)
    }

    async fn fetch(&self, node: &Node, request: &FetchRequest) -> Result<FetchResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_fetch(&over_wire(request)?)?)
    }

    async fn shard_query(&self, node: &Node, request: &ShardQueryRequest) -> Result<ShardQueryResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_shard_query(&over_wire(request)?)?)
    }

    async fn clear(&self, node: &Node, request: &ClearRequest) -> Result<ClearResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_clear(&over_wire(request)?)?)
    }

    async fn optimize(&self, node: &Node, request: &OptimizeRequest) -> Result<OptimizeResponse> {
        let manager = self.connect(node).await?;
        over_wire(&manager.internal_optimize(&over_wire(request)?)?)
    }
}
