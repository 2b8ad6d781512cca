//! Kademlia-list sharder: partitions a candidate peer list into
//! same-shard and cross-shard groups, sorts each by XOR distance, then
//! interleaves them so early slots favor topological and intra-shard
//! proximity without starving cross-shard connectivity.

use meridian_common::{ShardId, UNKNOWN_SHARD_ID};

use super::{xor_distance, PeerId};

/// Resolves which shard a peer belongs to. An unknown shard is always
/// treated as cross-shard, even if it happens to equal the caller's own
/// shard id numerically.
pub trait PeerShardResolver: Send + Sync {
    fn shard_of(&self, peer: &PeerId) -> ShardId;
}

pub struct KadListSharder<'a> {
    resolver: &'a dyn PeerShardResolver,
}

impl<'a> KadListSharder<'a> {
    pub fn new(resolver: &'a dyn PeerShardResolver) -> Self {
        Self { resolver }
    }

    /// Sorts `peers` relative to `reference` (typically "self"):
    /// same-shard peers ascending by distance, then cross-shard peers
    /// ascending by distance, interleaved one-for-one while both lists
    /// have entries, then whichever list has leftovers is appended.
    pub fn sort_list(&self, peers: &[PeerId], reference: &PeerId, self_shard: ShardId) -> Vec<PeerId> {
        let (mut same_shard, mut cross_shard) = self.split(peers, reference, self_shard);
        same_shard.sort_by_key(|(_, dist)| dist.clone());
        cross_shard.sort_by_key(|(_, dist)| dist.clone());
        interleave(same_shard, cross_shard)
    }

    fn split(
        &self,
        peers: &[PeerId],
        reference: &PeerId,
        self_shard: ShardId,
    ) -> (Vec<(PeerId, super::Distance)>, Vec<(PeerId, super::Distance)>) {
        let mut same_shard = Vec::new();
        let mut cross_shard = Vec::new();

        for peer in peers {
            let shard = self.resolver.shard_of(peer);
            let is_cross_shard = shard != self_shard || shard == UNKNOWN_SHARD_ID;
            let entry = (peer.clone(), xor_distance(reference, peer));
            if is_cross_shard {
                cross_shard.push(entry);
            } else {
                same_shard.push(entry);
            }
        }

        (same_shard, cross_shard)
    }
}

fn interleave(same_shard: Vec<(PeerId, super::Distance)>, cross_shard: Vec<(PeerId, super::Distance)>) -> Vec<PeerId> {
    let mut result = Vec::with_capacity(same_shard.len() + cross_shard.len());
    let mut same_iter = same_shard.into_iter();
    let mut cross_iter = cross_shard.into_iter();

    loop {
        match (same_iter.next(), cross_iter.next()) {
            (Some((a, _)), Some((b, _))) => {
                result.push(a);
                result.push(b);
            }
            (Some((a, _)), None) => {
                result.push(a);
                result.extend(same_iter.map(|(p, _)| p));
                break;
            }
            (None, Some((b, _))) => {
                result.push(b);
                result.extend(cross_iter.map(|(p, _)| p));
                break;
            }
            (None, None) => break,
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticResolver(HashMap<Vec<u8>, ShardId>);
    impl PeerShardResolver for StaticResolver {
        fn shard_of(&self, peer: &PeerId) -> ShardId {
            self.0.get(peer.0.as_ref()).copied().unwrap_or(UNKNOWN_SHARD_ID)
        }
    }

    fn pid(byte: u8) -> PeerId {
        PeerId::new(vec![byte])
    }

    #[test]
    fn interleaves_same_shard_and_cross_shard_peers() {
        let mut shards = HashMap::new();
        shards.insert(vec![1u8], 0);
        shards.insert(vec![2u8], 0);
        shards.insert(vec![3u8], 1);
        shards.insert(vec![4u8], 1);
        let resolver = StaticResolver(shards);
        let sharder = KadListSharder::new(&resolver);

        let peers = vec![pid(3), pid(1), pid(4), pid(2)];
        let sorted = sharder.sort_list(&peers, &pid(0), 0);

        // same-shard (0): [1, 2] by distance; cross-shard (1): [3, 4] by distance.
        assert_eq!(sorted, vec![pid(1), pid(3), pid(2), pid(4)]);
    }

    #[test]
    fn unknown_shard_counts_as_cross_shard() {
        let resolver = StaticResolver(HashMap::new());
        let sharder = KadListSharder::new(&resolver);
        let peers = vec![pid(1), pid(2)];
        let sorted = sharder.sort_list(&peers, &pid(0), 0);
        assert_eq!(sorted.len(), 2);
    }

    #[test]
    fn leftover_same_shard_peers_are_appended_after_interleaving() {
        let mut shards = HashMap::new();
        shards.insert(vec![1u8], 0);
        shards.insert(vec![2u8], 0);
        shards.insert(vec![3u8], 1);
        let resolver = StaticResolver(shards);
        let sharder = KadListSharder::new(&resolver);

        let peers = vec![pid(1), pid(2), pid(3)];
        let sorted = sharder.sort_list(&peers, &pid(0), 0);
        assert_eq!(sorted, vec![pid(1), pid(3), pid(2)]);
    }
}
