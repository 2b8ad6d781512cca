//! External collaborator contracts named in §6: the preprocessor is
//! generic over these rather than owning VM execution, account state or
//! networking itself.

use meridian_common::{Address, ShardId, Transaction};
use thiserror::Error;

/// Outcome of applying a transaction to account state. The two named
/// variants drive the bad-transaction pool-eviction policy; everything
/// else just aborts the current attempt without touching the pool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxExecError {
    #[error("lower nonce in transaction")]
    LowerNonceInTransaction,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("{0}")]
    Other(String),
}

/// Applies one transaction's effects (out of scope here: VM execution
/// itself, §1).
pub trait TxProcessor: Send + Sync {
    fn process_transaction(&self, tx: &Transaction, round: u64) -> Result<(), TxExecError>;
}

/// Snapshot/rollback surface of the account state trie, per §4.3's
/// journal-based revert protocol.
pub trait AccountsAdapter: Send + Sync {
    fn get_existing_account(&self, addr: &Address) -> Result<(), String>;
    fn journal_len(&self) -> u64;
    fn revert_to_snapshot(&self, snapshot: u64) -> Result<(), String>;
    fn commit(&self);
}

/// Economic parameters the preprocessor enforces (gas-limit checks
/// only; no broader economic policy, per §1 Non-goals).
pub trait FeeHandler: Send + Sync {
    fn max_gas_limit_per_block(&self) -> u64;
    fn min_gas_price(&self) -> u64;
    fn min_gas_limit(&self) -> u64;
    fn stake_value(&self) -> u128;
    fn un_bound_period(&self) -> u64;
}

/// Fire-and-forget hook to ask the network layer for missing
/// transactions.
pub trait RequestHandler: Send + Sync {
    fn on_request_transaction(&self, shard_id: ShardId, tx_hashes: Vec<meridian_common::Digest>);
}

/// The minimal shard-topology surface the preprocessor needs: its own
/// shard id and how many shards (excluding the metachain) exist.
pub trait ShardCoordinator: Send + Sync {
    fn self_id(&self) -> ShardId;
    fn number_of_shards(&self) -> u32;
}
