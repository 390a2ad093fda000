//! Shared grid state — the load table, the node pool, and the fixed topology.
//!
//! Cloned into the accept loop and every connection worker. The pool and
//! the table each sit behind their own mutex; every read-modify-write on
//! either happens under its lock, so leases and reclaims are linearizable.
//! Callers that also hold the worker tracker lock take it first.

use std::sync::Arc;

use tokio::sync::Mutex;

use gridhub_core::config::GridConfig;
use gridhub_core::{NodeId, Topology};

use crate::load_table::{GridError, LoadTable};
use crate::node_pool::{LeaseError, NodePool, PeerAddr};

#[derive(Clone)]
pub struct GridState {
    loads: Arc<Mutex<LoadTable>>,
    pool: Arc<Mutex<NodePool>>,
    topology: Arc<Topology>,
    base_voltage: f64,
}

impl GridState {
    /// Build from config and apply the configured startup load.
    pub fn from_config(config: &GridConfig) -> Result<Self, GridError> {
        let mut table = LoadTable::new(&config.load_nodes);
        table.update_amperage(&config.initial_load)?;
        Ok(Self {
            loads: Arc::new(Mutex::new(table)),
            pool: Arc::new(Mutex::new(NodePool::new(&config.assignable_nodes))),
            topology: Arc::new(config.topology()),
            base_voltage: config.base_voltage,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn base_voltage(&self) -> f64 {
        self.base_voltage
    }

    // ── Leases ────────────────────────────────────────────────────────────────

    pub async fn lease(&self, peer: PeerAddr) -> Result<NodeId, LeaseError> {
        let mut pool = self.pool.lock().await;
        let result = pool.lease(peer);
        match &result {
            Ok(node_id) => tracing::info!(%peer, node_id, "node leased"),
            Err(e) => tracing::warn!(%peer, error = %e, "lease refused"),
        }
        result
    }

    pub async fn reclaim(&self, peer: PeerAddr) -> Option<NodeId> {
        let released = self.pool.lock().await.reclaim(peer);
        if let Some(node_id) = released {
            tracing::info!(%peer, node_id, "node reclaimed");
        }
        released
    }

    pub async fn lease_of(&self, peer: &PeerAddr) -> Option<NodeId> {
        self.pool.lock().await.lease_of(peer)
    }

    pub async fn available_nodes(&self) -> Vec<NodeId> {
        self.pool.lock().await.available()
    }

    pub async fn pool_is_partitioned(&self) -> bool {
        self.pool.lock().await.is_partitioned()
    }

    // ── Loads ─────────────────────────────────────────────────────────────────

    pub async fn get_amperage(&self, node_id: NodeId) -> Option<f64> {
        self.loads.lock().await.get_amperage(node_id)
    }

    pub async fn snapshot_amperages(&self) -> Vec<f64> {
        self.loads.lock().await.snapshot_amperages()
    }

    pub async fn set_amperage(&self, node_id: NodeId, amperage: f64) -> Result<(), GridError> {
        self.loads.lock().await.set_amperage(node_id, amperage)
    }

    /// Load updater entry point: positional overwrite of the whole table.
    pub async fn update_amperage(&self, values: &[f64]) -> Result<(), GridError> {
        self.loads.lock().await.update_amperage(values)?;
        tracing::debug!(?values, "load table updated");
        Ok(())
    }
}
