use serde::{Deserialize, Serialize};
use crate::cluster::membership::ReplicaPreference;
use crate::core::types::{Document, FetchType};
use crate::engine::ShardSearch;
use crate::query::compiler::DefaultOperator;
use crate::search::results::{CountRequest, FacetResult, ResultCursor, ScoredResult, ShardQueryResult, SortField};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub document: Document,
}

impl StoreRequest {
    pub fn new(document: Document) -> Self {
        StoreRequest { document }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub index_name: String,
    pub unique_id: String,
    pub shard_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub index_name: String,
    pub unique_id: String,
}

impl DeleteRequest {
    pub fn new(index_name: &str, unique_id: &str) -> Self {
        DeleteRequest { index_name: index_name.to_string(), unique_id: unique_id.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub index_name: String,
    pub unique_id: String,
    pub shard_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub index_name: String,
    pub unique_id: String,
    #[serde(default)]
    pub fetch_type: FetchType,
    #[serde(default)]
    pub preference: ReplicaPreference,
}

impl FetchRequest {
    pub fn new(index_name: &str, unique_id: &str) -> Self {
        FetchRequest {
            index_name: index_name.to_string(),
            unique_id: unique_id.to_string(),
            fetch_type: FetchType::Full,
            preference: ReplicaPreference::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub document: Option<Document>,
}

/// Client query over one or more indexes. Empty `query_fields` falls back
/// to each index's default search fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub indexes: Vec<String>,
    pub query: String,
    pub query_fields: Vec<String>,          // `title^2` style boosts allowed
    pub default_operator: DefaultOperator,
    pub minimum_should_match: u32,
    pub dismax_tie_breaker: Option<f32>,
    pub amount: usize,
    pub start: usize,                       // Ignored when last_result is set
    pub last_result: Option<ResultCursor>,
    pub sort: Option<SortField>,
    pub count_requests: Vec<CountRequest>,
    pub fetch_type: FetchType,
    pub preference: ReplicaPreference,
}

impl Default for QueryRequest {
    fn default() -> Self {
        QueryRequest {
            indexes: Vec::new(),
            query: String::new(),
            query_fields: Vec::new(),
            default_operator: DefaultOperator::Or,
            minimum_should_match: 0,
            dismax_tie_breaker: None,
            amount: 10,
            start: 0,
            last_result: None,
            sort: None,
            count_requests: Vec::new(),
            fetch_type: FetchType::Full,
            preference: ReplicaPreference::default(),
        }
    }
}

impl QueryRequest {
    pub fn new(index_name: &str, query: &str) -> Self {
        QueryRequest {
            indexes: vec![index_name.to_string()],
            query: query.to_string(),
            ..QueryRequest::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub total_hits: u64,
    pub results: Vec<ScoredResult>,
    pub facet_counts: Vec<FacetResult>,
    pub last_result: Option<ResultCursor>,   // Pass back for the next page
}

/// One shard's part of a fanned out query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQueryRequest {
    pub index_name: String,
    pub shard_number: u32,
    pub search: ShardSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQueryResponse {
    pub result: ShardQueryResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearRequest {
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResponse {
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub index_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub index_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_from_partial_json() {
        let request: QueryRequest = serde_json::from_str(
            r#"{"indexes": ["books"], "query": "title:dune", "amount": 5, "default_operator": "And"}"#,
        ).unwrap();

        assert_eq!(request.amount, 5);
        assert_eq!(request.default_operator, DefaultOperator::And);
        assert_eq!(request.fetch_type, FetchType::Full);
        assert_eq!(request.preference, ReplicaPreference::PrimaryOnly);
        assert!(request.last_result.is_none());
    }
}
