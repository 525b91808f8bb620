use serde::{Serialize, Deserialize};
use serde_json::Value;

/// Stored form of one document, keyed by its unique id within an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub unique_id: String,
    pub index_name: String,
    pub timestamp: i64,       // Millis since epoch of the last store
    pub body: Value,          // Indexed JSON object
    pub metadata: Value,      // Stored alongside, never indexed
}

impl Document {
    pub fn new(unique_id: &str, index_name: &str, body: Value) -> Self {
        Document {
            unique_id: unique_id.to_string(),
            index_name: index_name.to_string(),
            timestamp: 0,
            body,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Copy reduced to what the requested fetch type asks for.
    pub fn for_fetch_type(&self, fetch_type: FetchType) -> Option<Document> {
        match fetch_type {
            FetchType::Full => Some(self.clone()),
            FetchType::Meta => Some(Document {
                body: Value::Null,
                ..self.clone()
            }),
            FetchType::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchType {
    #[default]
    Full,
    Meta,
    None,
}

/// (index, shard) pair addressed by one routed request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub index_name: String,
    pub shard_number: u32,
}

impl ShardKey {
    pub fn new(index_name: &str, shard_number: u32) -> Self {
        ShardKey { index_name: index_name.to_string(), shard_number }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_fetch_drops_body_only() {
        let doc = Document::new("1", "books", json!({"title": "Dune"}))
            .with_metadata(json!({"source": "import"}));

        let meta = doc.for_fetch_type(FetchType::Meta).unwrap();
        assert_eq!(meta.body, Value::Null);
        assert_eq!(meta.metadata, json!({"source": "import"}));
        assert!(doc.for_fetch_type(FetchType::None).is_none());
    }
}
