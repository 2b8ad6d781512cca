use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardingError {
    #[error("peer was not found in the routing table")]
    UnknownPeer,
}
