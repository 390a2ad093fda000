//! Worker tracker — at most one live connection worker per peer address.
//!
//! A new connection from an address that already has a worker retires the
//! old worker and reclaims its node before the new one starts. Workers
//! carry a connection id so a retired worker cleaning up late, or still
//! finishing an `rni`, cannot touch its successor's entry or lease.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use gridhub_core::NodeId;
use gridhub_services::{GridState, LeaseError, PeerAddr};

use crate::connection::Disconnect;

struct TrackedWorker {
    conn_id: u64,
    retire: oneshot::Sender<()>,
    handle: JoinHandle<Disconnect>,
}

#[derive(Default)]
pub struct WorkerTracker {
    workers: Mutex<HashMap<PeerAddr, TrackedWorker>>,
    next_id: AtomicU64,
}

impl WorkerTracker {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reclaim `peer`'s node, start its worker through `spawn`, and retire
    /// any worker it replaces. Returns the new connection id.
    ///
    /// Lock order is tracker, then pool.
    pub async fn admit<F>(&self, peer: PeerAddr, state: &GridState, spawn: F) -> u64
    where
        F: FnOnce(u64, oneshot::Receiver<()>) -> JoinHandle<Disconnect>,
    {
        let mut workers = self.workers.lock().await;

        state.reclaim(peer).await;

        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (retire, retired) = oneshot::channel();
        let handle = spawn(conn_id, retired);

        let previous = workers.insert(
            peer,
            TrackedWorker {
                conn_id,
                retire,
                handle,
            },
        );

        if let Some(previous) = previous {
            tracing::info!(%peer, old = previous.conn_id, new = conn_id, "retiring replaced worker");
            let _ = previous.retire.send(());
            tokio::spawn(reap(peer, previous.conn_id, previous.handle));
        }

        conn_id
    }

    /// Lease a node to `peer` on behalf of connection `conn_id`.
    ///
    /// Runs under the tracker lock, so it is ordered against `admit`: a
    /// connection that has been replaced gets `None` and can never take a
    /// node after its successor's reclaim.
    pub async fn lease(
        &self,
        peer: PeerAddr,
        conn_id: u64,
        state: &GridState,
    ) -> Option<Result<NodeId, LeaseError>> {
        let workers = self.workers.lock().await;
        if workers.get(&peer).map(|w| w.conn_id) != Some(conn_id) {
            tracing::debug!(%peer, conn_id, "lease refused for replaced connection");
            return None;
        }
        Some(state.lease(peer).await)
    }

    /// Drop the entry for `conn_id` and return the peer's node to the pool.
    /// No-op when `peer` has since been taken over by another connection.
    pub async fn release(&self, peer: PeerAddr, conn_id: u64, state: &GridState) {
        let mut workers = self.workers.lock().await;
        if workers.get(&peer).map(|w| w.conn_id) == Some(conn_id) {
            workers.remove(&peer);
            state.reclaim(peer).await;
        }
    }

    /// Drop the entry for `conn_id` and leave the lease in place.
    pub async fn forget(&self, peer: PeerAddr, conn_id: u64) {
        let mut workers = self.workers.lock().await;
        if workers.get(&peer).map(|w| w.conn_id) == Some(conn_id) {
            workers.remove(&peer);
        }
    }

    pub async fn conn_id_of(&self, peer: PeerAddr) -> Option<u64> {
        self.workers.lock().await.get(&peer).map(|w| w.conn_id)
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait up to `grace` for every tracked worker to finish, then abort
    /// the stragglers.
    pub async fn drain(&self, grace: Duration) {
        let workers: Vec<TrackedWorker> = self.workers.lock().await.drain().map(|(_, w)| w).collect();
        if workers.is_empty() {
            return;
        }

        let aborts: Vec<_> = workers.iter().map(|w| w.handle.abort_handle()).collect();
        let handles = workers.into_iter().map(|w| w.handle);

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(results) => tracing::info!(workers = results.len(), "connection workers drained"),
            Err(_) => {
                tracing::warn!(workers = aborts.len(), ?grace, "workers still running after grace period, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn reap(peer: PeerAddr, conn_id: u64, handle: JoinHandle<Disconnect>) {
    match handle.await {
        Ok(reason) => tracing::debug!(%peer, conn_id, %reason, "replaced worker finished"),
        Err(e) => tracing::warn!(%peer, conn_id, error = %e, "replaced worker failed"),
    }
}
