//! Load table — the amperage currently drawn at each load node.
//!
//! Node ids and their order are fixed when the table is built. Positive
//! amperage is consumption, negative is production.

use gridhub_core::NodeId;

#[derive(Debug, Clone, Copy, PartialEq)]
struct LoadRecord {
    node_id: NodeId,
    amperage: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GridError {
    #[error("node {0} has no load record")]
    UnknownNode(NodeId),
    #[error("expected {expected} load values, got {got}")]
    LoadLength { expected: usize, got: usize },
}

#[derive(Debug, Clone)]
pub struct LoadTable {
    records: Vec<LoadRecord>,
}

impl LoadTable {
    /// Table with every node at 0 A.
    pub fn new(node_ids: &[NodeId]) -> Self {
        Self {
            records: node_ids
                .iter()
                .map(|&node_id| LoadRecord {
                    node_id,
                    amperage: 0.0,
                })
                .collect(),
        }
    }

    pub fn get_amperage(&self, node_id: NodeId) -> Option<f64> {
        self.records
            .iter()
            .find(|r| r.node_id == node_id)
            .map(|r| r.amperage)
    }

    /// Amperages in table order, without node ids.
    pub fn snapshot_amperages(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.amperage).collect()
    }

    pub fn set_amperage(&mut self, node_id: NodeId, amperage: f64) -> Result<(), GridError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.node_id == node_id)
            .ok_or(GridError::UnknownNode(node_id))?;
        record.amperage = amperage;
        Ok(())
    }

    /// Overwrite every record positionally.
    pub fn update_amperage(&mut self, values: &[f64]) -> Result<(), GridError> {
        if values.len() != self.records.len() {
            return Err(GridError::LoadLength {
                expected: self.records.len(),
                got: values.len(),
            });
        }
        for (record, value) in self.records.iter_mut().zip(values) {
            record.amperage = *value;
        }
        Ok(())
    }
}
