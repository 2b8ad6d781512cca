//! Shared domain types used across the trie, pool, gas, sharding and
//! preprocessor crates: addresses, digests, transactions and miniblocks.

mod errors;

pub use errors::CommonError;

use ethereum_types::{H160, H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Keccak256};

/// Shard identifier. Shards are numbered `0..num_shards`; two reserved
/// values are carved out of the `u32` space for the metachain and for
/// peers whose shard assignment is not yet known.
pub type ShardId = u32;

/// The shard that finalizes cross-shard bookkeeping; never holds regular
/// account state.
pub const METACHAIN_SHARD_ID: ShardId = ShardId::MAX;

/// Sentinel for a peer whose shard hasn't been resolved yet. Treated as
/// cross-shard by the sharder (see `meridian-sharding`).
pub const UNKNOWN_SHARD_ID: ShardId = ShardId::MAX - 1;

/// Fixed-width cryptographic digest (32 bytes). Used both as a trie node
/// hash and as a transaction fingerprint.
pub type Digest = H256;

/// Account address.
pub type Address = H160;

/// Number of leading zero bytes that mark an [`Address`] as belonging to a
/// smart contract rather than a regular user account.
pub const NUM_LEADING_ZERO_BYTES_SC_ADDRESS: usize = 8;

/// Returns whether `addr` looks like a smart-contract address, i.e. it
/// carries [`NUM_LEADING_ZERO_BYTES_SC_ADDRESS`] leading zero bytes.
pub fn is_smart_contract_address(addr: &Address) -> bool {
    addr.as_bytes()[..NUM_LEADING_ZERO_BYTES_SC_ADDRESS]
        .iter()
        .all(|b| *b == 0)
}

/// Parses a `0x`-prefixed hex string into an [`Address`]. Used wherever
/// addresses cross a text boundary (RPC params, config files, CLI args).
pub fn parse_address_hex(value: &str) -> Result<Address, CommonError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| CommonError::InvalidAddressLength(value.len()))?;
    if bytes.len() != 20 {
        return Err(CommonError::InvalidAddressLength(bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Parses a `0x`-prefixed hex string into a [`Digest`].
pub fn parse_digest_hex(value: &str) -> Result<Digest, CommonError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|_| CommonError::InvalidDigestLength(value.len()))?;
    if bytes.len() != 32 {
        return Err(CommonError::InvalidDigestLength(bytes.len()));
    }
    Ok(Digest::from_slice(&bytes))
}

/// Builds the canonical `"<sender>_<receiver>"` cache id for a shard pair.
/// Both directions of a pair produce distinct ids.
pub fn shard_cache_id(sender_shard: ShardId, receiver_shard: ShardId) -> String {
    format!("{sender_shard}_{receiver_shard}")
}

/// A single transaction as seen by the preprocessor. Mirrors the wire
/// transaction closely enough to compute gas and ordering, but carries no
/// execution semantics of its own (that's the VM's job, out of scope here).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub sender: Address,
    pub receiver: Address,
    pub value: U256,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Computes the transaction's fingerprint: `keccak(canonical(self))`.
    /// The canonical encoding is a fixed-order, length-prefixed
    /// concatenation of every field; it is not meant to be a wire format,
    /// only a stable input to the hasher.
    pub fn fingerprint(&self) -> Digest {
        let mut hasher = Keccak256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.sender.as_bytes());
        hasher.update(self.receiver.as_bytes());
        let mut value_buf = [0u8; 32];
        self.value.to_big_endian(&mut value_buf);
        hasher.update(value_buf);
        hasher.update(self.gas_price.to_be_bytes());
        hasher.update(self.gas_limit.to_be_bytes());
        hasher.update((self.data.len() as u64).to_be_bytes());
        hasher.update(&self.data);
        hasher.update((self.signature.len() as u64).to_be_bytes());
        hasher.update(&self.signature);
        Digest::from_slice(hasher.finalize().as_slice())
    }
}

/// The kind of payload carried by a [`MiniBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MiniBlockType {
    Tx,
    Scr,
    Reward,
    Peer,
}

/// A shard-to-shard batch of transaction hashes, ordered for deterministic
/// replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBlock {
    pub sender_shard: ShardId,
    pub receiver_shard: ShardId,
    pub ty: MiniBlockType,
    pub tx_hashes: Vec<Digest>,
}

impl MiniBlock {
    pub fn new(sender_shard: ShardId, receiver_shard: ShardId, ty: MiniBlockType) -> Self {
        Self {
            sender_shard,
            receiver_shard,
            ty,
            tx_hashes: Vec::new(),
        }
    }

    /// Cache id this miniblock's transactions are expected to live under.
    pub fn cache_id(&self) -> String {
        shard_cache_id(self.sender_shard, self.receiver_shard)
    }
}
