//! MiniBlock compacter (component C8): pure functions over the caller's
//! inputs, with no knowledge of the pool, storage, or gas ledger.

use std::collections::HashMap;

use meridian_common::{Digest, MiniBlock, MiniBlockType, ShardId};

/// The shard-routing fact the compacter needs about a transaction: which
/// shard pair it belongs to. Mirrors §3's tx-for-block map entry shape
/// (minus the transaction payload itself, which `Expand`'s callers don't
/// need).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxShardInfo {
    pub sender_shard: ShardId,
    pub receiver_shard: ShardId,
}

/// Merges adjacent miniblocks that share `(type, sender_shard,
/// receiver_shard)` by concatenating their tx hashes, preserving order.
/// Non-adjacent miniblocks with the same triple are left distinct, same
/// as the original's single left-to-right pass.
pub fn compact(miniblocks: Vec<MiniBlock>) -> Vec<MiniBlock> {
    let mut out: Vec<MiniBlock> = Vec::with_capacity(miniblocks.len());
    for mb in miniblocks {
        match out.last_mut() {
            Some(last) if can_merge(last, &mb) => last.tx_hashes.extend(mb.tx_hashes),
            _ => out.push(mb),
        }
    }
    out
}

fn can_merge(a: &MiniBlock, b: &MiniBlock) -> bool {
    a.ty == b.ty && a.sender_shard == b.sender_shard && a.receiver_shard == b.receiver_shard
}

/// Inverse of [`compact`]: regroups each miniblock's tx hashes by the
/// actual receiver shard recorded for each hash in `tx_shard_info`,
/// falling back to the miniblock's own declared receiver for any hash
/// the map doesn't know about. A miniblock whose hashes all resolve to
/// one receiver round-trips to a single miniblock; this is how replay
/// recovers per-destination miniblocks from a compacted one even when
/// compaction merged across more than the caller originally built.
/// Non-`Tx` miniblocks pass through untouched — they carry no
/// transactions to regroup.
pub fn expand(miniblocks: Vec<MiniBlock>, tx_shard_info: &HashMap<Digest, TxShardInfo>) -> Vec<MiniBlock> {
    let mut out = Vec::new();
    for mb in miniblocks {
        if mb.ty != MiniBlockType::Tx {
            out.push(mb);
            continue;
        }

        let mut order: Vec<ShardId> = Vec::new();
        let mut groups: HashMap<ShardId, Vec<Digest>> = HashMap::new();
        for hash in mb.tx_hashes {
            let receiver = tx_shard_info.get(&hash).map(|info| info.receiver_shard).unwrap_or(mb.receiver_shard);
            groups.entry(receiver).or_insert_with(|| {
                order.push(receiver);
                Vec::new()
            }).push(hash);
        }

        for receiver in order {
            let tx_hashes = groups.remove(&receiver).unwrap_or_default();
            out.push(MiniBlock {
                sender_shard: mb.sender_shard,
                receiver_shard: receiver,
                ty: MiniBlockType::Tx,
                tx_hashes,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(sender: ShardId, receiver: ShardId, ty: MiniBlockType, hashes: &[u8]) -> MiniBlock {
        MiniBlock {
            sender_shard: sender,
            receiver_shard: receiver,
            ty,
            tx_hashes: hashes.iter().map(|b| Digest::from_low_u64_be(*b as u64)).collect(),
        }
    }

    #[test]
    fn compact_merges_adjacent_miniblocks_with_identical_shard_pair() {
        let a = mb(0, 1, MiniBlockType::Tx, &[1, 2]);
        let b = mb(0, 1, MiniBlockType::Tx, &[3, 4]);
        let compacted = compact(vec![a, b]);
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].tx_hashes.len(), 4);
    }

    #[test]
    fn compact_leaves_differing_shard_pairs_distinct() {
        let a = mb(0, 1, MiniBlockType::Tx, &[1]);
        let b = mb(0, 2, MiniBlockType::Tx, &[2]);
        let compacted = compact(vec![a, b]);
        assert_eq!(compacted.len(), 2);
    }

    #[test]
    fn expand_is_the_inverse_of_compact_for_a_single_destination() {
        let a = mb(0, 1, MiniBlockType::Tx, &[1, 2]);
        let b = mb(0, 1, MiniBlockType::Tx, &[3, 4]);
        let original_hashes: Vec<Digest> = a.tx_hashes.iter().chain(b.tx_hashes.iter()).copied().collect();

        let mut info = HashMap::new();
        for h in &original_hashes {
            info.insert(*h, TxShardInfo { sender_shard: 0, receiver_shard: 1 });
        }

        let compacted = compact(vec![a, b]);
        let expanded = expand(compacted, &info);

        assert_eq!(expanded.len(), 1);
        let mut got = expanded[0].tx_hashes.clone();
        let mut want = original_hashes;
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn expand_splits_by_the_actual_receiver_shard_recorded_in_the_map() {
        let merged = mb(0, ShardId::MAX, MiniBlockType::Tx, &[1, 2, 3]);
        let h1 = Digest::from_low_u64_be(1);
        let h2 = Digest::from_low_u64_be(2);
        let h3 = Digest::from_low_u64_be(3);
        let mut info = HashMap::new();
        info.insert(h1, TxShardInfo { sender_shard: 0, receiver_shard: 1 });
        info.insert(h2, TxShardInfo { sender_shard: 0, receiver_shard: 2 });
        info.insert(h3, TxShardInfo { sender_shard: 0, receiver_shard: 1 });

        let expanded = expand(vec![merged], &info);
        assert_eq!(expanded.len(), 2);
        let to_1 = expanded.iter().find(|m| m.receiver_shard == 1).unwrap();
        let to_2 = expanded.iter().find(|m| m.receiver_shard == 2).unwrap();
        assert_eq!(to_1.tx_hashes, vec![h1, h3]);
        assert_eq!(to_2.tx_hashes, vec![h2]);
    }

    #[test]
    fn non_tx_miniblocks_pass_through_expand_unchanged() {
        let reward = mb(0, 0, MiniBlockType::Reward, &[1]);
        let expanded = expand(vec![reward.clone()], &HashMap::new());
        assert_eq!(expanded, vec![reward]);
    }
}
