//! Routing table and Kademlia-list sharder (component C7): the
//! topology primitives the p2p layer and the preprocessor's peer
//! selection sit on top of. Distance is XOR-over-bytes, read as an
//! unsigned big integer (zero-padded to equal length so byte-lexical
//! comparison of the XOR is the same order as comparing the integers).

pub mod error;
pub mod sharder;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use parking_lot::RwLock;

pub use error::ShardingError;
pub use sharder::{KadListSharder, PeerShardResolver};

/// Opaque peer identifier. Distance comparisons only care about its
/// bytes, not its provenance (libp2p id, raw pubkey hash, etc).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Bytes);

impl PeerId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

/// XOR distance between two peer ids, represented as the big-endian,
/// equal-length XOR byte string. `Ord` on that byte string agrees with
/// numeric comparison of the corresponding unsigned integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(Vec<u8>);

pub fn xor_distance(a: &PeerId, b: &PeerId) -> Distance {
    let len = a.0.len().max(b.0.len());
    let pad = |bytes: &Bytes| -> Vec<u8> {
        let mut padded = vec![0u8; len - bytes.len()];
        padded.extend_from_slice(bytes);
        padded
    };
    let (pa, pb) = (pad(&a.0), pad(&b.0));
    Distance(pa.iter().zip(pb.iter()).map(|(x, y)| x ^ y).collect())
}

/// Kademlia-style routing table keyed by XOR distance to `current`.
/// `Update` is idempotent: re-adding a known peer is a no-op.
pub struct RoutingTable {
    current: PeerId,
    by_distance: RwLock<BTreeMap<Distance, Vec<PeerId>>>,
    distance_of: RwLock<HashMap<PeerId, Distance>>,
}

impl RoutingTable {
    pub fn new(current: PeerId) -> Self {
        let table = Self {
            current: current.clone(),
            by_distance: RwLock::new(BTreeMap::new()),
            distance_of: RwLock::new(HashMap::new()),
        };
        table.update(current);
        table
    }

    /// Inserts or re-confirms `peer`. A peer already known at its
    /// current distance is left untouched.
    pub fn update(&self, peer: PeerId) {
        if self.distance_of.read().contains_key(&peer) {
            return;
        }
        let distance = xor_distance(&self.current, &peer);
        self.distance_of.write().insert(peer.clone(), distance.clone());
        self.by_distance.write().entry(distance).or_default().push(peer);
    }

    pub fn has(&self, peer: &PeerId) -> bool {
        self.distance_of.read().contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.distance_of.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All known peers (including self) with their distance, ascending.
    pub fn peers(&self) -> Vec<(PeerId, Distance)> {
        self.by_distance
            .read()
            .iter()
            .flat_map(|(dist, peers)| peers.iter().map(move |p| (p.clone(), dist.clone())))
            .collect()
    }

    pub fn get_distance(&self, peer: &PeerId) -> Result<Distance, ShardingError> {
        self.distance_of.read().get(peer).cloned().ok_or(ShardingError::UnknownPeer)
    }

    /// The first `max_no` known peers ascending by distance, excluding
    /// `current` itself.
    pub fn nearest_peers(&self, max_no: usize) -> Vec<PeerId> {
        let mut found = Vec::with_capacity(max_no);
        for (_, peers) in self.by_distance.read().iter() {
            for peer in peers {
                if *peer == self.current {
                    continue;
                }
                found.push(peer.clone());
                if found.len() == max_no {
                    return found;
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(byte: u8) -> PeerId {
        PeerId::new(vec![byte])
    }

    #[test]
    fn update_is_idempotent() {
        let table = RoutingTable::new(pid(0));
        table.update(pid(5));
        table.update(pid(5));
        assert_eq!(table.len(), 2); // self + one peer
    }

    #[test]
    fn nearest_peers_excludes_self_and_is_ascending() {
        let table = RoutingTable::new(pid(0x00));
        table.update(pid(0x0f));
        table.update(pid(0xf0));
        table.update(pid(0x01));

        let nearest = table.nearest_peers(10);
        assert_eq!(nearest, vec![pid(0x01), pid(0x0f), pid(0xf0)]);
    }

    #[test]
    fn get_distance_errors_for_unknown_peer() {
        let table = RoutingTable::new(pid(0));
        assert!(table.get_distance(&pid(1)).is_err());
    }

    #[test]
    fn distance_is_symmetric() {
        assert_eq!(xor_distance(&pid(3), &pid(9)), xor_distance(&pid(9), &pid(3)));
    }
}
