use meridian_gas::GasError;
use thiserror::Error;

/// Errors surfaced by [`crate::TransactionPreprocessor`]. Build-time call
/// sites (`CreateAndProcessMiniBlocks`) absorb these per tx and move on;
/// replay-time call sites (`ProcessBlockTransactions`) propagate them and
/// abort the block.
#[derive(Debug, Error)]
pub enum PreprocessorError {
    #[error("time is out")]
    TimeIsOut,
    #[error("missing transaction {0:?}")]
    MissingTransaction(meridian_common::Digest),
    #[error("wrong type in mini block")]
    WrongTypeInMiniBlock,
    #[error("nil transaction block body")]
    NilBody,
    #[error("mini block pool is missing")]
    MiniBlockPoolMissing,
    #[error("gas limit reached: {0}")]
    GasLimitReached(String),
    #[error(transparent)]
    Gas(#[from] GasError),
    #[error("transaction execution failed: {0}")]
    Exec(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<meridian_storage::StorageError> for PreprocessorError {
    fn from(err: meridian_storage::StorageError) -> Self {
        PreprocessorError::Storage(err.to_string())
    }
}
