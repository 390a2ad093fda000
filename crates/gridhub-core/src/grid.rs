//! Grid model — node identities, the fixed topology, and trade requests.
//!
//! The topology is a radial feeder rooted at the transformer (node 1).
//! Load slot `i` is the load at the destination of edge `i`, so the reference
//! feeder maps slots 0..5 onto nodes 2..6 (cable id = node id - 1).

use serde::{Deserialize, Serialize};

/// Identifier of a position in the grid.
pub type NodeId = u32;

/// Node id of the transformer feeding the grid. Never leased, carries no load.
pub const TRANSFORMER_NODE: NodeId = 1;

/// Base voltage at the transformer, in volts.
pub const DEFAULT_BASE_VOLTAGE: f64 = 230.0;

/// Number of load slots an `rlc` request describes.
pub const TRADE_SLOTS: usize = 5;

/// Load slots filled from the three amperages reported in an `rlc` request.
/// The remaining slots are sent as `0`.
pub const REPORTED_SLOTS: [usize; 3] = [1, 3, 4];

/// A cable between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub destination: NodeId,
    /// Ohms.
    pub resistance: f64,
}

impl Edge {
    pub const fn new(source: NodeId, destination: NodeId, resistance: f64) -> Self {
        Self {
            source,
            destination,
            resistance,
        }
    }
}

/// The fixed set of cables. Read-only once the server starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    edges: Vec<Edge>,
}

impl Topology {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    /// The five-household feeder the simulation was built around.
    pub fn reference() -> Self {
        Self::new(reference_edges())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

}

pub fn reference_edges() -> Vec<Edge> {
    vec![
        Edge::new(1, 2, 0.01),
        Edge::new(2, 3, 0.5),
        Edge::new(2, 4, 0.3),
        Edge::new(4, 5, 0.2),
        Edge::new(4, 6, 0.1),
    ]
}

/// Nodes carrying a load record, in table order.
pub fn reference_load_nodes() -> Vec<NodeId> {
    vec![2, 3, 4, 5, 6]
}

/// Nodes a household can lease. Junctions 2 and 4 are never handed out.
pub fn reference_assignable_nodes() -> Vec<NodeId> {
    vec![3, 5, 6]
}

/// Load the reference process applies at startup, per node 2..6.
pub fn reference_initial_load() -> Vec<f64> {
    vec![0.0, -5.0, 0.0, 25.0, 15.0]
}

/// An energy trade a household wants estimated. Lives for one `rlc` request.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub buyer_node_id: NodeId,
    pub seller_node_id: NodeId,
    pub offer: f64,
    /// Amperages the household reported, in `REPORTED_SLOTS` order.
    pub reported_amperages: [f64; 3],
}

impl TradeRequest {
    /// Load vector handed to the estimation engine. Slots not reported by the
    /// household are `0`, not the live table value.
    pub fn load_vector(&self) -> [f64; TRADE_SLOTS] {
        let mut loads = [0.0; TRADE_SLOTS];
        for (slot, amperage) in REPORTED_SLOTS.iter().zip(self.reported_amperages) {
            loads[*slot] = amperage;
        }
        loads
    }
}
