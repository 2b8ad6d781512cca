use thiserror::Error;

/// Errors that can arise from the shared domain types themselves (as
/// opposed to the trie, pool or preprocessor, which define their own
/// richer error enums).
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidAddressLength(usize),
    #[error("invalid digest length: expected 32 bytes, got {0}")]
    InvalidDigestLength(usize),
}
