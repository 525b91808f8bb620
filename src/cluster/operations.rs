use async_trait::async_trait;
use crate::cluster::client::PeerClient;
use crate::cluster::membership::RoutingTarget;
use crate::cluster::router::RoutedOperation;
use crate::core::error::Result;
use crate::node::index_manager::IndexManager;
use crate::node::requests::{
    DeleteRequest, DeleteResponse, FetchRequest, FetchResponse, ShardQueryRequest, ShardQueryResponse,
    StoreRequest, StoreResponse,
};

/// Local path runs on `manager`, remote path goes through `client`.
macro_rules! routed_operation {
    ($name:ident, $label:literal, $request:ty, $response:ty, $local:ident, $remote:ident) => {
        pub struct $name<'a> {
            manager: &'a IndexManager,
            client: &'a dyn PeerClient,
        }

        impl<'a> $name<'a> {
            pub fn new(manager: &'a IndexManager, client: &'a dyn PeerClient) -> Self {
                $name { manager, client }
            }
        }

        #[async_trait]
        impl RoutedOperation for $name<'_> {
            type Request = $request;
            type Response = $response;

            fn name(&self) -> &'static str {
                $label
            }

            async fn process_internal(&self, _target: &RoutingTarget, request: &$request) -> Result<$response> {
                self.manager.$local(request)
            }

            async fn process_external(&self, target: &RoutingTarget, request: &$request) -> Result<$response> {
                self.client.$remote(&target.node, request).await
            }
        }
    };
}

routed_operation!(StoreOperation, "store", StoreRequest, StoreResponse, internal_store, store);
routed_operation!(DeleteOperation, "delete", DeleteRequest, DeleteResponse, internal_delete, delete);
routed_operation!(FetchOperation, "fetch", FetchRequest, FetchResponse, internal_fetch, fetch);
routed_operation!(ShardQueryOperation, "shard query", ShardQueryRequest, ShardQueryResponse, internal_shard_query, shard_query);
