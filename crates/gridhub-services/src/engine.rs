//! Estimation engine trait — the opaque grid model behind `rlc`.
//!
//! An engine turns a trade and the grid it happens on into one number. It
//! is owned by a single thread (see `estimation::EstimationClient`) and is
//! never called concurrently, so implementations may hold non-`Sync` state
//! such as a child process.

use serde::Serialize;

use gridhub_core::{Edge, NodeId, Topology, TradeRequest};

/// Everything an engine is given for one estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateParams {
    pub base_voltage: f64,
    /// One amperage per load slot; slot `i` belongs to the destination of
    /// `topology[i]`.
    pub amperages: Vec<f64>,
    pub buyer_node_id: NodeId,
    pub seller_node_id: NodeId,
    pub offer: f64,
    pub topology: Vec<Edge>,
}

impl EstimateParams {
    /// Parameters for an `rlc` trade, using the trade's own load vector.
    pub fn for_trade(trade: &TradeRequest, base_voltage: f64, topology: &Topology) -> Self {
        Self {
            base_voltage,
            amperages: trade.load_vector().to_vec(),
            buyer_node_id: trade.buyer_node_id,
            seller_node_id: trade.seller_node_id,
            offer: trade.offer,
            topology: topology.edges().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The engine cannot be reached (process gone, pipe closed).
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine ran but produced no usable result.
    #[error("engine failed: {0}")]
    Failed(String),
    /// The parameters do not describe a trade on this grid.
    #[error("invalid estimate input: {0}")]
    InvalidInput(String),
}

pub trait EstimationEngine: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Produce the raw, unrounded estimate.
    fn estimate(&mut self, params: &EstimateParams) -> Result<f64, EngineError>;

    /// Release whatever the engine holds. Called once, from the engine thread.
    fn shutdown(&mut self) {}
}
