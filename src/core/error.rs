use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    NotFound,
    InvalidArgument,
    Internal,
    /// Shard or directory entry is absent, or its writer is closed.
    ShardUnavailable,
    /// Transient transport failure or timeout talking to a remote node.
    NodeUnreachable,
    MalformedRequest,
    /// The indexing engine failed during mutate, commit or reader open.
    EngineFailure,
    /// Numeric bound stepping left the range of the field type.
    Overflow,
    Cancelled,
}

#[derive(Debug, Clone, ThisError)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn shard_unavailable(index_name: &str, shard_number: u32) -> Self {
        Error::new(
            ErrorKind::ShardUnavailable,
            format!("shard <{}> for index <{}> is not available", shard_number, index_name),
        )
    }

    pub fn no_available_node(index_name: &str, shard_number: u32) -> Self {
        Error::new(
            ErrorKind::ShardUnavailable,
            format!("no available node for shard <{}> of index <{}>", shard_number, index_name),
        )
    }

    pub fn node_unreachable(context: String) -> Self {
        Error::new(ErrorKind::NodeUnreachable, context)
    }

    pub fn malformed(context: String) -> Self {
        Error::new(ErrorKind::MalformedRequest, context)
    }

    pub fn engine(index_name: &str, shard_number: u32, cause: impl std::fmt::Display) -> Self {
        Error::new(
            ErrorKind::EngineFailure,
            format!("index <{}> shard <{}>: {}", index_name, shard_number, cause),
        )
    }

    /// Failures the router answers by trying the next candidate node.
    pub fn is_node_unavailable(&self) -> bool {
        self.kind == ErrorKind::NodeUnreachable
    }

    pub fn is_request_error(&self) -> bool {
        !self.is_node_unavailable()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unreachable_nodes_trigger_failover() {
        assert!(Error::node_unreachable("timeout".to_string()).is_node_unavailable());
        assert!(Error::malformed("bad id".to_string()).is_request_error());
        assert!(Error::shard_unavailable("books", 3).is_request_error());
        assert!(Error::new(ErrorKind::Overflow, "int32".to_string()).is_request_error());
    }

    #[test]
    fn no_available_node_names_index_and_shard() {
        let err = Error::no_available_node("books", 7);
        assert_eq!(err.kind, ErrorKind::ShardUnavailable);
        assert!(err.context.contains("books"));
        assert!(err.context.contains("<7>"));
    }
}
