use std::sync::Arc;
use async_trait::async_trait;
use tracing::error;
use crate::core::error::{Error, Result};
use crate::node::index_manager::IndexManager;
use crate::node::requests::{
    ClearRequest, ClearResponse, DeleteRequest, DeleteResponse, FetchRequest, FetchResponse,
    OptimizeRequest, OptimizeResponse, QueryRequest, QueryResponse, ShardQueryRequest,
    ShardQueryResponse, StoreRequest, StoreResponse,
};

/// Boundary adapter from a decoded inbound request to the index manager.
/// Transports call `handle_call`, which reports failures through `on_error`
/// before passing them back for encoding.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    type Request: Send + 'static;
    type Response: Send;

    fn name(&self) -> &'static str;

    async fn handle(&self, request: Self::Request) -> Result<Self::Response>;

    async fn handle_call(&self, request: Self::Request) -> Result<Self::Response> {
        let result = self.handle(request).await;
        if let Err(e) = &result {
            self.on_error(e);
        }
        result
    }

    fn on_error(&self, error: &Error) {
        error!(handler = self.name(), kind = ?error.kind, "{}", error.context);
    }
}

macro_rules! manager_handler {
    ($name:ident, $label:literal, $request:ty, $response:ty, |$manager:ident, $req:ident| $body:expr) => {
        pub struct $name {
            manager: Arc<IndexManager>,
        }

        impl $name {
            pub fn new(manager: Arc<IndexManager>) -> Self {
                $name { manager }
            }
        }

        #[async_trait]
        impl RequestHandler for $name {
            type Request = $request;
            type Response = $response;

            fn name(&self) -> &'static str {
                $label
            }

            async fn handle(&self, $req: $request) -> Result<$response> {
                let $manager = &self.manager;
                $body
            }
        }
    };
}

manager_handler!(StoreHandler, "store", StoreRequest, StoreResponse,
    |manager, request| manager.store(request).await);

manager_handler!(DeleteHandler, "delete", DeleteRequest, DeleteResponse,
    |manager, request| manager.delete(request).await);

manager_handler!(FetchHandler, "fetch", FetchRequest, FetchResponse,
    |manager, request| manager.fetch(request).await);

manager_handler!(QueryHandler, "query", QueryRequest, QueryResponse,
    |manager, request| manager.query(request).await);

// Served for peers fanning out a query; always runs on local shards
manager_handler!(ShardQueryHandler, "shard query", ShardQueryRequest, ShardQueryResponse,
    |manager, request| manager.internal_shard_query(&request));

manager_handler!(ClearHandler, "clear", ClearRequest, ClearResponse,
    |manager, request| manager.clear(request).await);

manager_handler!(OptimizeHandler, "optimize", OptimizeRequest, OptimizeResponse,
    |manager, request| manager.optimize(request).await);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::cluster::client::LoopbackClient;
    use crate::cluster::membership::IndexMapping;
    use crate::core::clock::SystemClock;
    use crate::core::config::{Config, IndexSettings};
    use crate::core::error::ErrorKind;
    use crate::core::types::Document;
    use crate::engine::memory::MemoryEngine;
    use crate::index::index_config::IndexDefinition;

    fn manager() -> Arc<IndexManager> {
        let manager = IndexManager::new(
            Config { node_id: "a".to_string(), ..Config::default() },
            Arc::new(MemoryEngine::new()),
            Arc::new(SystemClock),
            Arc::new(LoopbackClient::new()),
        );
        let definition = IndexDefinition {
            index_name: "books".to_string(),
            fields: Vec::new(),
            settings: IndexSettings { number_of_shards: 2, ..IndexSettings::default() },
        };
        manager.create_index(definition, IndexMapping::single_node("books", 2, "a")).unwrap();
        Arc::new(manager)
    }

    #[tokio::test]
    async fn handlers_delegate_to_manager() {
        let manager = manager();
        let store = StoreHandler::new(manager.clone());
        let fetch = FetchHandler::new(manager.clone());

        let doc = Document::new("7", "books", json!({"title": "dune"}));
        let stored = store.handle_call(StoreRequest::new(doc)).await.unwrap();
        assert_eq!(stored.unique_id, "7");

        let fetched = fetch.handle_call(FetchRequest::new("books", "7")).await.unwrap();
        assert!(fetched.document.is_some());
        assert_eq!(store.name(), "store");
    }

    #[tokio::test]
    async fn errors_are_passed_back() {
        let query = QueryHandler::new(manager());
        let err = query.handle_call(QueryRequest::new("films", "*:*")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
