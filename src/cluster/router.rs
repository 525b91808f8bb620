use std::time::Duration;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};
use crate::cluster::membership::{candidate_nodes, MembershipSnapshot, ReplicaPreference, RoutingTarget};
use crate::core::error::{Error, Result};
use crate::core::types::ShardKey;

/// One kind of shard-addressed request. Implementors supply the local and
/// the remote path; candidate selection and failover live in the router.
///
/// Both paths must be safe to apply twice for the same request, since a
/// timed out remote attempt may have been applied before failover.
#[async_trait]
pub trait RoutedOperation: Send + Sync {
    type Request: Clone + Send + Sync;
    type Response: Send;

    fn name(&self) -> &'static str;

    async fn process_internal(&self, target: &RoutingTarget, request: &Self::Request) -> Result<Self::Response>;

    async fn process_external(&self, target: &RoutingTarget, request: &Self::Request) -> Result<Self::Response>;
}

/// Candidate ordering and failover shared by every routed operation.
/// Dropping the returned future stops further attempts; effects of
/// attempts already made are kept.
#[derive(Debug, Clone)]
pub struct NodeRouter {
    timeout: Duration,
}

impl NodeRouter {
    pub fn new(timeout: Duration) -> Self {
        NodeRouter { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves candidates for `shard` from the snapshot and sends to them.
    pub async fn route<O: RoutedOperation>(
        &self,
        snapshot: &MembershipSnapshot,
        shard: &ShardKey,
        preference: ReplicaPreference,
        operation: &O,
        request: &O::Request,
    ) -> Result<O::Response> {
        let candidates = candidate_nodes(snapshot, shard, preference)?;
        self.send(&candidates, shard, operation, request).await
    }

    /// Tries candidates in order. Only unreachable nodes (timeouts included)
    /// move on to the next candidate; any other error is returned as is.
    pub async fn send<O: RoutedOperation>(
        &self,
        candidates: &[RoutingTarget],
        shard: &ShardKey,
        operation: &O,
        request: &O::Request,
    ) -> Result<O::Response> {
        for target in candidates {
            debug!(
                operation = operation.name(),
                node = %target.node.id,
                index = %shard.index_name,
                shard = shard.shard_number,
                local = target.local,
                "routing request"
            );

            match self.attempt(operation, target, request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_node_unavailable() => {
                    warn!("{} on node <{}> for shard <{}> of index <{}> failed, trying next node: {}",
                        operation.name(), target.node.id, shard.shard_number, shard.index_name, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::no_available_node(&shard.index_name, shard.shard_number))
    }

    /// Applies a write the primary already acknowledged to each replica.
    /// Replicas are written concurrently and a failed replica does not undo
    /// the write; returns how many replicas applied it.
    pub async fn replicate<O: RoutedOperation>(
        &self,
        replicas: &[RoutingTarget],
        shard: &ShardKey,
        operation: &O,
        request: &O::Request,
    ) -> usize {
        let outcomes = join_all(replicas.iter().map(|target| async move {
            let outcome = self.attempt(operation, target, request).await;
            if let Err(e) = &outcome {
                warn!("{} on replica <{}> for shard <{}> of index <{}> failed: {}",
                    operation.name(), target.node.id, shard.shard_number, shard.index_name, e);
            }
            outcome
        }))
        .await;

        let applied = outcomes.iter().filter(|o| o.is_ok()).count();
        debug!(
            operation = operation.name(),
            index = %shard.index_name,
            shard = shard.shard_number,
            applied,
            replicas = replicas.len(),
            "replicated write"
        );
        applied
    }

    async fn attempt<O: RoutedOperation>(
        &self,
        operation: &O,
        target: &RoutingTarget,
        request: &O::Request,
    ) -> Result<O::Response> {
        if target.local {
            operation.process_internal(target, request).await
        } else {
            self.external(operation, target, request).await
        }
    }

    async fn external<O: RoutedOperation>(
        &self,
        operation: &O,
        target: &RoutingTarget,
        request: &O::Request,
    ) -> Result<O::Response> {
        match tokio::time::timeout(self.timeout, operation.process_external(target, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::node_unreachable(format!(
                "node <{}> did not answer {} within {:?}",
                target.node.id,
                operation.name(),
                self.timeout
            ))),
        }
    }
}
