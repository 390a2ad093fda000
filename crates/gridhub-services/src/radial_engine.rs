//! Built-in estimation engine — I²R line losses on a radial feeder.
//!
//! The estimate is the change in total cable loss (watts) when the buyer
//! draws `offer` more amps and the seller `offer` fewer. Each cable carries
//! the summed load of everything downstream of it.

use gridhub_core::{Edge, NodeId};

use crate::engine::{EngineError, EstimateParams, EstimationEngine};

#[derive(Debug, Default)]
pub struct RadialFlowEngine;

impl RadialFlowEngine {
    pub fn new() -> Self {
        Self
    }
}

impl EstimationEngine for RadialFlowEngine {
    fn name(&self) -> &'static str {
        "radial"
    }

    fn estimate(&mut self, params: &EstimateParams) -> Result<f64, EngineError> {
        let edges = &params.topology;
        if params.amperages.len() != edges.len() {
            return Err(EngineError::InvalidInput(format!(
                "{} amperages for {} cables",
                params.amperages.len(),
                edges.len()
            )));
        }
        if !(params.base_voltage.is_finite() && params.base_voltage > 0.0) {
            return Err(EngineError::InvalidInput(format!(
                "base voltage {}",
                params.base_voltage
            )));
        }

        let buyer = slot_of(edges, params.buyer_node_id)?;
        let seller = slot_of(edges, params.seller_node_id)?;

        let before = line_loss(edges, &params.amperages)?;

        let mut traded = params.amperages.clone();
        traded[buyer] += params.offer;
        traded[seller] -= params.offer;
        let after = line_loss(edges, &traded)?;

        Ok(after - before)
    }
}

fn slot_of(edges: &[Edge], node_id: NodeId) -> Result<usize, EngineError> {
    edges
        .iter()
        .position(|e| e.destination == node_id)
        .ok_or_else(|| EngineError::InvalidInput(format!("node {node_id} carries no load")))
}

/// Total I²R loss with `loads[i]` drawn at the destination of `edges[i]`.
fn line_loss(edges: &[Edge], loads: &[f64]) -> Result<f64, EngineError> {
    let mut loss = 0.0;
    for (i, edge) in edges.iter().enumerate() {
        let current = downstream_current(edges, loads, i, 0)?;
        loss += current * current * edge.resistance;
    }
    Ok(loss)
}

fn downstream_current(
    edges: &[Edge],
    loads: &[f64],
    index: usize,
    depth: usize,
) -> Result<f64, EngineError> {
    if depth > edges.len() {
        return Err(EngineError::InvalidInput("topology has a cycle".into()));
    }
    let node = edges[index].destination;
    let mut current = loads[index];
    for (child, edge) in edges.iter().enumerate() {
        if edge.source == node {
            current += downstream_current(edges, loads, child, depth + 1)?;
        }
    }
    Ok(current)
}
