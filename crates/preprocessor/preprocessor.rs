//! Transaction preprocessor (component C9): orchestrates selection,
//! execution, snapshotting and miniblock build on the proposer side, and
//! expansion/replay on the validator side. See the crate's collaborator
//! traits in [`traits`] and the pure miniblock transforms in
//! [`compacter`].

pub mod compacter;
pub mod error;
pub mod traits;

use std::{collections::HashMap, sync::Arc, time::Duration};

use crossbeam_channel::{bounded, Receiver, Sender};
use meridian_common::{
    is_smart_contract_address, shard_cache_id, Digest, MiniBlock, MiniBlockType, ShardId, Transaction,
    METACHAIN_SHARD_ID,
};
use meridian_gas::GasAccountant;
use meridian_pool::ShardedDataCacherNotifier;
use meridian_storage::KvStore;
use parking_lot::{Mutex, RwLock};
use sha3::{Digest as _, Keccak256};

pub use compacter::TxShardInfo;
pub use error::PreprocessorError;
pub use traits::{AccountsAdapter, FeeHandler, RequestHandler, ShardCoordinator, TxExecError, TxProcessor};

use compacter::{compact, expand};

/// What the preprocessor knows about one fingerprint: the transaction
/// itself, once it has arrived, and the shard pair it routes through.
/// `tx` is `None` for a fingerprint that's been requested but not yet
/// received (§4.3's missing-transaction synchronization).
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub tx: Option<Transaction>,
    pub shard_info: TxShardInfo,
}

struct Inner {
    tx_hash_and_info: RwLock<HashMap<Digest, TxRecord>>,
    missing_txs: Mutex<usize>,
    ordered_txs: RwLock<HashMap<String, Vec<Digest>>>,
    all_arrived_tx: Sender<()>,
    all_arrived_rx: Receiver<()>,
}

/// Orchestrates block-build selection and block-replay execution for one
/// shard's outgoing and incoming transactions. Generic over its five
/// external collaborators (§6) so it owns no VM, no account state and no
/// networking of its own.
pub struct TransactionPreprocessor {
    self_shard: ShardId,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    pool: Arc<dyn ShardedDataCacherNotifier<Transaction>>,
    storage: Arc<dyn KvStore>,
    gas: Arc<GasAccountant>,
    tx_processor: Arc<dyn TxProcessor>,
    accounts: Arc<dyn AccountsAdapter>,
    fee_handler: Arc<dyn FeeHandler>,
    request_handler: Arc<dyn RequestHandler>,
    inner: Arc<Inner>,
}

impl TransactionPreprocessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_shard: ShardId,
        shard_coordinator: Arc<dyn ShardCoordinator>,
        pool: Arc<dyn ShardedDataCacherNotifier<Transaction>>,
        storage: Arc<dyn KvStore>,
        gas: Arc<GasAccountant>,
        tx_processor: Arc<dyn TxProcessor>,
        accounts: Arc<dyn AccountsAdapter>,
        fee_handler: Arc<dyn FeeHandler>,
        request_handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (all_arrived_tx, all_arrived_rx) = bounded(1);
        let inner = Arc::new(Inner {
            tx_hash_and_info: RwLock::new(HashMap::new()),
            missing_txs: Mutex::new(0),
            ordered_txs: RwLock::new(HashMap::new()),
            all_arrived_tx,
            all_arrived_rx,
        });

        let handler_inner = Arc::clone(&inner);
        let handler_pool = Arc::clone(&pool);
        pool.register_handler(Arc::new(move |key: &[u8]| {
            on_transaction_received(&handler_inner, handler_pool.as_ref(), key);
        }));

        Self {
            self_shard,
            shard_coordinator,
            pool,
            storage,
            gas,
            tx_processor,
            accounts,
            fee_handler,
            request_handler,
            inner,
        }
    }

    /// Executes every transaction named by a previously-received block
    /// body, in declared order. Any missing transaction or execution
    /// failure aborts the block immediately — replay errors are fatal,
    /// unlike build-time errors.
    ///
    /// `body` is expanded against the shard info already collected for
    /// this block (via [`Self::request_block_transactions`] or prior
    /// processing) before replay, the same way the proposer's compacted
    /// miniblocks are split back into their per-destination pieces.
    pub fn process_block_transactions(
        &self,
        body: &[MiniBlock],
        round: u64,
        have_time: &dyn Fn() -> bool,
    ) -> Result<(), PreprocessorError> {
        if body.is_empty() {
            return Err(PreprocessorError::NilBody);
        }

        let shard_info: HashMap<Digest, TxShardInfo> = self
            .inner
            .tx_hash_and_info
            .read()
            .iter()
            .map(|(hash, record)| (*hash, record.shard_info))
            .collect();
        let expanded = expand(body.to_vec(), &shard_info);

        for mb in &expanded {
            if mb.ty != MiniBlockType::Tx {
                continue;
            }
            for tx_hash in &mb.tx_hashes {
                if !have_time() {
                    return Err(PreprocessorError::TimeIsOut);
                }

                let record = self.inner.tx_hash_and_info.read().get(tx_hash).cloned();
                let tx = match record.and_then(|r| r.tx) {
                    Some(tx) => tx,
                    None => return Err(PreprocessorError::MissingTransaction(*tx_hash)),
                };

                self.tx_processor
                    .process_transaction(&tx, round)
                    .map_err(|err| PreprocessorError::Exec(err.to_string()))?;
            }
        }

        Ok(())
    }

    /// Builds and executes miniblocks for every destination shard up to
    /// `max_txs`/`max_mbs`, then compacts the result. Never errors: a
    /// deadline or a budget exhaustion simply stops selection early and
    /// returns whatever was built so far.
    pub fn create_and_process_mini_blocks(
        &self,
        max_txs: usize,
        max_mbs: usize,
        round: u64,
        have_time: &dyn Fn() -> bool,
    ) -> Vec<MiniBlock> {
        let mut built = Vec::new();
        let mut added_txs = 0usize;

        for dst in self.destination_shards() {
            if built.len() >= max_mbs || added_txs >= max_txs || !have_time() {
                break;
            }

            let space_remained = max_txs - added_txs;
            let mb = self.create_and_process_mini_block(dst, space_remained, round, have_time);
            added_txs += mb.tx_hashes.len();
            if !mb.tx_hashes.is_empty() {
                built.push(mb);
            }
        }

        compact(built)
    }

    fn destination_shards(&self) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> = (0..self.shard_coordinator.number_of_shards()).collect();
        shards.push(METACHAIN_SHARD_ID);
        shards
    }

    /// Builds at most one miniblock bound for `dst`: pulls the
    /// nonce-ordered candidate list (computed once per block build and
    /// cached), then walks it applying the gas-accounting protocol from
    /// §4.3 and the bad-transaction eviction policy on failure.
    fn create_and_process_mini_block(
        &self,
        dst: ShardId,
        space_remained: usize,
        round: u64,
        have_time: &dyn Fn() -> bool,
    ) -> MiniBlock {
        let cache_id = shard_cache_id(self.self_shard, dst);
        let ordered = {
            let mut cached = self.inner.ordered_txs.write();
            cached
                .entry(cache_id.clone())
                .or_insert_with(|| self.compute_ordered_txs(dst))
                .clone()
        };

        let mut mb = MiniBlock::new(self.self_shard, dst, MiniBlockType::Tx);
        let mut gas_sender: u64 = 0;
        let mut gas_receiver: u64 = 0;

        for tx_hash in ordered {
            if mb.tx_hashes.len() >= space_remained || !have_time() {
                break;
            }

            let Some(cache) = self.pool.shard_data_store(&cache_id) else { break };
            let Some(tx) = cache.peek(tx_hash.as_bytes()) else { continue };

            let (gas_in_sender, gas_in_receiver, self_gas) =
                match self.gas_for_candidate(self.self_shard, dst, &tx, tx_hash, gas_sender, gas_receiver) {
                    Ok(split) => split,
                    // Build-time rejection is never fatal: skip the tx and try the next one.
                    Err(_) => continue,
                };

            let snapshot = self.accounts.journal_len();
            match self.tx_processor.process_transaction(&tx, round) {
                Ok(()) => {
                    gas_sender += gas_in_sender;
                    gas_receiver += gas_in_receiver;
                    self.gas.set_gas_consumed(self_gas, tx_hash);
                    mb.tx_hashes.push(tx_hash);
                }
                Err(err) => {
                    tracing::debug!(?tx_hash, %err, "bad tx during mini block build, reverting and skipping");
                    let _ = self.accounts.revert_to_snapshot(snapshot);
                    self.gas.remove_gas_consumed(&[tx_hash]);
                    self.gas.remove_gas_refunded(&[tx_hash]);
                    self.process_and_remove_bad_transaction(&err, &tx_hash, &cache_id);
                }
            }
        }

        mb
    }

    fn process_and_remove_bad_transaction(&self, err: &TxExecError, tx_hash: &Digest, cache_id: &str) {
        if matches!(err, TxExecError::LowerNonceInTransaction | TxExecError::InsufficientFunds) {
            tracing::debug!(?tx_hash, %err, "evicting bad transaction from pool");
            self.pool.remove_data(tx_hash.as_bytes(), cache_id);
        }
    }

    /// Sender/receiver gas split for one candidate transaction, plus the
    /// gas-accounting admission checks from §4.3's protocol: the refund
    /// adjustment for smart-contract receivers, the per-miniblock cap on
    /// whichever side isn't `self`, and the per-block cap on `self`'s
    /// own share. Shared by mini block build (caller skips the tx on
    /// `Err`) and mini block replay (caller aborts the whole block).
    fn gas_for_candidate(
        &self,
        sender_shard: ShardId,
        receiver_shard: ShardId,
        tx: &Transaction,
        tx_hash: Digest,
        mb_gas_sender: u64,
        mb_gas_receiver: u64,
    ) -> Result<(u64, u64, u64), PreprocessorError> {
        let (mut gas_in_sender, mut gas_in_receiver) =
            self.gas.compute_gas_consumed_by_tx(sender_shard, receiver_shard, tx)?;

        if is_smart_contract_address(&tx.receiver) {
            let refund = self.gas.gas_refunded(&tx_hash);
            if refund > gas_in_receiver {
                return Err(PreprocessorError::Gas(meridian_gas::GasError::InsufficientGasLimitInTx {
                    limit: gas_in_receiver,
                    refunded: refund,
                }));
            }
            gas_in_receiver -= refund;
            if sender_shard == receiver_shard {
                gas_in_sender = gas_in_sender.saturating_sub(refund);
            }
        }

        let max_gas = self.fee_handler.max_gas_limit_per_block();
        let self_gas = if self.self_shard == sender_shard {
            if mb_gas_receiver + gas_in_receiver > max_gas {
                return Err(PreprocessorError::GasLimitReached(
                    "max gas per mini block in receiver shard reached".into(),
                ));
            }
            gas_in_sender
        } else {
            if mb_gas_sender + gas_in_sender > max_gas {
                return Err(PreprocessorError::GasLimitReached(
                    "max gas per mini block in sender shard reached".into(),
                ));
            }
            gas_in_receiver
        };

        if self.gas.total_gas_consumed() + self_gas > max_gas {
            return Err(PreprocessorError::GasLimitReached(
                "max gas per block in self shard reached".into(),
            ));
        }

        Ok((gas_in_sender, gas_in_receiver, self_gas))
    }

    /// Replays a single already-received miniblock in declared order:
    /// every transaction must already be in the pool (no network
    /// requests are issued here — that's [`Self::request_transactions_for_mini_block`]'s
    /// job) and every gas check and execution must succeed, or the whole
    /// miniblock is rejected and any gas already recorded for it is
    /// unwound. Unlike mini block build, this never skips a transaction.
    pub fn process_mini_block(
        &self,
        mb: &MiniBlock,
        round: u64,
        have_time: &dyn Fn() -> bool,
    ) -> Result<(), PreprocessorError> {
        if mb.ty != MiniBlockType::Tx {
            return Err(PreprocessorError::WrongTypeInMiniBlock);
        }

        let cache_id = mb.cache_id();
        let cache = self
            .pool
            .shard_data_store(&cache_id)
            .ok_or(PreprocessorError::MiniBlockPoolMissing)?;

        let mut txs = Vec::with_capacity(mb.tx_hashes.len());
        for tx_hash in &mb.tx_hashes {
            if !have_time() {
                return Err(PreprocessorError::TimeIsOut);
            }
            let tx = cache
                .peek(tx_hash.as_bytes())
                .ok_or(PreprocessorError::MissingTransaction(*tx_hash))?;
            txs.push(tx);
        }

        let mut processed = Vec::with_capacity(txs.len());
        let result = self.process_mini_block_inner(mb, round, have_time, &txs, &mut processed);
        if result.is_err() {
            self.gas.remove_gas_consumed(&processed);
            self.gas.remove_gas_refunded(&processed);
        }
        result
    }

    fn process_mini_block_inner(
        &self,
        mb: &MiniBlock,
        round: u64,
        have_time: &dyn Fn() -> bool,
        txs: &[Transaction],
        processed: &mut Vec<Digest>,
    ) -> Result<(), PreprocessorError> {
        let mut gas_sender: u64 = 0;
        let mut gas_receiver: u64 = 0;

        for (tx_hash, tx) in mb.tx_hashes.iter().zip(txs) {
            if !have_time() {
                return Err(PreprocessorError::TimeIsOut);
            }
            let (gas_in_sender, gas_in_receiver, self_gas) =
                self.gas_for_candidate(mb.sender_shard, mb.receiver_shard, tx, *tx_hash, gas_sender, gas_receiver)?;
            gas_sender += gas_in_sender;
            gas_receiver += gas_in_receiver;
            self.gas.set_gas_consumed(self_gas, *tx_hash);
            processed.push(*tx_hash);
        }

        for tx in txs {
            if !have_time() {
                return Err(PreprocessorError::TimeIsOut);
            }
            self.tx_processor
                .process_transaction(tx, round)
                .map_err(|err| PreprocessorError::Exec(err.to_string()))?;
        }

        let shard_info = TxShardInfo { sender_shard: mb.sender_shard, receiver_shard: mb.receiver_shard };
        let mut info = self.inner.tx_hash_and_info.write();
        for (tx_hash, tx) in mb.tx_hashes.iter().zip(txs) {
            info.insert(*tx_hash, TxRecord { tx: Some(tx.clone()), shard_info });
        }

        Ok(())
    }

    /// Nonce-ascending, insertion-order-stable candidate list for one
    /// `(self_shard, dst)` cache id. `Cache::keys` already returns
    /// insertion order; a stable sort by nonce then preserves
    /// insertion-order as the tie-break within a nonce, matching §4.3's
    /// ordering rule without a bespoke ordered structure.
    fn compute_ordered_txs(&self, dst: ShardId) -> Vec<Digest> {
        let cache_id = shard_cache_id(self.self_shard, dst);
        let Some(cache) = self.pool.shard_data_store(&cache_id) else {
            return Vec::new();
        };

        let mut entries: Vec<(u64, Digest)> = Vec::new();
        for key in cache.keys() {
            if key.len() != 32 {
                continue;
            }
            if let Some(tx) = cache.peek(&key) {
                entries.push((tx.nonce, Digest::from_slice(&key)));
            }
        }
        entries.sort_by_key(|(nonce, _)| *nonce);
        entries.into_iter().map(|(_, hash)| hash).collect()
    }

    /// Re-inserts a previously-built block body's transactions and
    /// miniblocks into the local pools, for when a proposed block is
    /// rolled back and its transactions need to become selectable again.
    pub fn restore_tx_block_into_pools(
        &self,
        body: &[MiniBlock],
        mb_pool: &dyn ShardedDataCacherNotifier<MiniBlock>,
    ) -> Result<usize, PreprocessorError> {
        if body.is_empty() {
            return Err(PreprocessorError::NilBody);
        }

        let mut restored = 0usize;
        for mb in body {
            {
                let tx_hash_and_info = self.inner.tx_hash_and_info.read();
                for tx_hash in &mb.tx_hashes {
                    if let Some(TxRecord { tx: Some(tx), .. }) = tx_hash_and_info.get(tx_hash) {
                        self.pool.add_data(tx_hash.as_bytes().to_vec(), tx.clone(), &mb.cache_id());
                    }
                }
            }
            mb_pool.add_data(mini_block_hash(mb).as_bytes().to_vec(), mb.clone(), &mb.cache_id());
            restored += 1;
        }

        Ok(restored)
    }

    /// Drops a block body's transactions and miniblocks from the local
    /// pools once the block is finalized and they no longer need to be
    /// selectable for another proposal.
    pub fn remove_tx_block_from_pools(
        &self,
        body: &[MiniBlock],
        mb_pool: &dyn ShardedDataCacherNotifier<MiniBlock>,
    ) -> Result<(), PreprocessorError> {
        if body.is_empty() {
            return Err(PreprocessorError::NilBody);
        }

        for mb in body {
            for tx_hash in &mb.tx_hashes {
                self.pool.remove_data(tx_hash.as_bytes(), &mb.cache_id());
            }
            mb_pool.remove_data(mini_block_hash(mb).as_bytes(), &mb.cache_id());
        }

        Ok(())
    }

    /// Asks the network layer for every transaction named by `body` that
    /// this node doesn't already hold, returning the number requested.
    pub fn request_block_transactions(&self, body: &[MiniBlock]) -> usize {
        body.iter().map(|mb| self.request_transactions_for_mini_block(mb)).sum()
    }

    /// Asks the network layer for the transactions in one miniblock that
    /// this node doesn't already hold. Records each as missing in
    /// `tx_hash_and_info` so [`Self::is_data_prepared`] can wait on them.
    pub fn request_transactions_for_mini_block(&self, mb: &MiniBlock) -> usize {
        if mb.ty != MiniBlockType::Tx {
            return 0;
        }

        let cache_id = mb.cache_id();
        let cache = self.pool.shard_data_store(&cache_id);
        let mut missing = Vec::new();
        {
            let mut info = self.inner.tx_hash_and_info.write();
            for tx_hash in &mb.tx_hashes {
                let already_have = cache.as_ref().is_some_and(|c| c.peek(tx_hash.as_bytes()).is_some());
                if already_have {
                    continue;
                }
                info.entry(*tx_hash).or_insert_with(|| TxRecord {
                    tx: None,
                    shard_info: TxShardInfo {
                        sender_shard: mb.sender_shard,
                        receiver_shard: mb.receiver_shard,
                    },
                });
                missing.push(*tx_hash);
            }
        }

        if missing.is_empty() {
            return 0;
        }

        *self.inner.missing_txs.lock() += missing.len();
        self.request_handler.on_request_transaction(mb.sender_shard, missing.clone());
        missing.len()
    }

    /// Blocks until every transaction requested via
    /// [`Self::request_block_transactions`] has arrived, or `timeout`
    /// elapses.
    pub fn is_data_prepared(&self, timeout: Duration) -> Result<(), PreprocessorError> {
        if *self.inner.missing_txs.lock() == 0 {
            return Ok(());
        }

        loop {
            match self.inner.all_arrived_rx.recv_timeout(timeout) {
                Ok(()) => {
                    if *self.inner.missing_txs.lock() == 0 {
                        return Ok(());
                    }
                }
                Err(_) => return Err(PreprocessorError::TimeIsOut),
            }
        }
    }

    pub fn save_tx_block_to_storage(&self, body: &[MiniBlock]) -> Result<(), PreprocessorError> {
        if body.is_empty() {
            return Err(PreprocessorError::NilBody);
        }

        let encoded = serde_json::to_vec(body).map_err(|err| PreprocessorError::Codec(err.to_string()))?;
        let mut hasher = Keccak256::new();
        hasher.update(&encoded);
        let key = Digest::from_slice(hasher.finalize().as_slice());
        self.storage.put(key.as_bytes().to_vec(), encoded)?;
        Ok(())
    }

    /// Resets all per-block-build state: drains the all-arrived
    /// notification channel, clears the missing-transaction counter and
    /// map, and clears the cached nonce-ordered candidate lists.
    pub fn create_block_started(&self) {
        while self.inner.all_arrived_rx.try_recv().is_ok() {}
        *self.inner.missing_txs.lock() = 0;
        self.inner.tx_hash_and_info.write().clear();
        self.inner.ordered_txs.write().clear();
        self.gas.reset();
    }

    pub fn get_all_current_used_txs(&self) -> HashMap<Digest, TxRecord> {
        self.inner.tx_hash_and_info.read().clone()
    }
}

fn mini_block_hash(mb: &MiniBlock) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(serde_json::to_vec(mb).expect("miniblock fields are always serializable"));
    Digest::from_slice(hasher.finalize().as_slice())
}

/// Pool insertion hook: when a previously-missing fingerprint's payload
/// arrives, fills in its `tx_hash_and_info` entry and, once the counter
/// reaches zero, wakes whoever is blocked in `is_data_prepared`.
fn on_transaction_received(inner: &Inner, pool: &dyn ShardedDataCacherNotifier<Transaction>, key: &[u8]) {
    if key.len() != 32 {
        return;
    }
    let hash = Digest::from_slice(key);

    let shard_info = {
        let info = inner.tx_hash_and_info.read();
        match info.get(&hash) {
            Some(record) if record.tx.is_none() => record.shard_info,
            _ => return,
        }
    };

    let cache_id = shard_cache_id(shard_info.sender_shard, shard_info.receiver_shard);
    let Some(cache) = pool.shard_data_store(&cache_id) else { return };
    let Some(tx) = cache.peek(key) else { return };

    let became_complete = {
        let mut info = inner.tx_hash_and_info.write();
        match info.get_mut(&hash) {
            Some(record) if record.tx.is_none() => {
                record.tx = Some(tx);
                true
            }
            _ => false,
        }
    };

    if !became_complete {
        return;
    }

    let mut missing = inner.missing_txs.lock();
    if *missing > 0 {
        *missing -= 1;
        if *missing == 0 {
            let _ = inner.all_arrived_tx.try_send(());
        }
    }
}
