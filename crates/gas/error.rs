use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GasError {
    #[error("insufficient gas limit in transaction: gas limit {limit} is lower than refunded gas {refunded}")]
    InsufficientGasLimitInTx { limit: u64, refunded: u64 },
}
