//! Node pool — which assignable nodes are free and which peer holds the rest.
//!
//! Every assignable node is either in `available` or leased to exactly one
//! peer, never both and never neither. A peer holds at most one node.
//! Peers are identified by IP address only, so a household reconnecting from
//! a new source port is still the same peer.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use gridhub_core::NodeId;

pub type PeerAddr = IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("no node available")]
    NoCapacity,
    #[error("peer already holds node {0}")]
    AlreadyLeased(NodeId),
}

#[derive(Debug, Clone)]
pub struct NodePool {
    /// Iterates in ascending order; the smallest free id is leased first.
    available: BTreeSet<NodeId>,
    leased: HashMap<PeerAddr, NodeId>,
    /// The closed universe of assignable ids.
    universe: BTreeSet<NodeId>,
}

impl NodePool {
    pub fn new(assignable: &[NodeId]) -> Self {
        let universe: BTreeSet<NodeId> = assignable.iter().copied().collect();
        Self {
            available: universe.clone(),
            leased: HashMap::new(),
            universe,
        }
    }

    /// Lease the smallest available node to `peer`.
    pub fn lease(&mut self, peer: PeerAddr) -> Result<NodeId, LeaseError> {
        if let Some(held) = self.leased.get(&peer) {
            return Err(LeaseError::AlreadyLeased(*held));
        }
        let node_id = self.available.pop_first().ok_or(LeaseError::NoCapacity)?;
        self.leased.insert(peer, node_id);
        Ok(node_id)
    }

    /// Return `peer`'s node to the pool. `None` if it held nothing.
    pub fn reclaim(&mut self, peer: PeerAddr) -> Option<NodeId> {
        let node_id = self.leased.remove(&peer)?;
        self.available.insert(node_id);
        Some(node_id)
    }

    pub fn lease_of(&self, peer: &PeerAddr) -> Option<NodeId> {
        self.leased.get(peer).copied()
    }

    /// Free ids, ascending.
    pub fn available(&self) -> Vec<NodeId> {
        self.available.iter().copied().collect()
    }

    /// Checks the closed-world partition: available and leased ids are
    /// disjoint, leased ids are distinct, and together they cover the universe.
    pub fn is_partitioned(&self) -> bool {
        let mut seen = self.available.clone();
        for node_id in self.leased.values() {
            if !seen.insert(*node_id) {
                return false;
            }
        }
        seen == self.universe
    }
}
