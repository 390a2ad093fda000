//! Connection worker — one per accepted household connection.
//!
//! Reads a request, dispatches it against the grid state or the estimation
//! client, and writes the reply, until the peer goes away, breaks the
//! protocol, falls silent past the idle timeout, is replaced by a newer
//! connection from the same address, or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};

use gridhub_core::wire::{self, DecodeError, ErrorCode, Request, Response, MAX_FRAME_LEN};
use gridhub_services::{
    EngineError, EstimateParams, EstimationClient, EstimationError, GridState, PeerAddr,
};

use crate::tracker::WorkerTracker;

/// Shared handles every worker needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub state: GridState,
    pub estimator: EstimationClient,
    pub tracker: Arc<WorkerTracker>,
    pub idle_timeout: Option<Duration>,
    pub release_on_disconnect: bool,
}

/// Why a worker stopped.
#[derive(Debug, thiserror::Error)]
pub enum Disconnect {
    #[error("server shutting down")]
    Shutdown,
    #[error("replaced by a newer connection")]
    Replaced,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("idle for {0:?}")]
    IdleTimeout(Duration),
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] DecodeError),
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}

impl Disconnect {
    /// Should the peer's node go back to the pool right away?
    pub fn releases_lease(&self, release_on_disconnect: bool) -> bool {
        match self {
            Disconnect::IdleTimeout(_) => true,
            Disconnect::PeerClosed
            | Disconnect::ProtocolViolation(_)
            | Disconnect::Transport(_) => release_on_disconnect,
            Disconnect::Shutdown | Disconnect::Replaced => false,
        }
    }
}

pub struct ConnectionWorker {
    stream: TcpStream,
    peer_addr: SocketAddr,
    conn_id: u64,
    ctx: ConnectionContext,
    shutdown: broadcast::Receiver<()>,
    retire: oneshot::Receiver<()>,
}

impl ConnectionWorker {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        conn_id: u64,
        ctx: ConnectionContext,
        shutdown: broadcast::Receiver<()>,
        retire: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            stream,
            peer_addr,
            conn_id,
            ctx,
            shutdown,
            retire,
        }
    }

    fn peer(&self) -> PeerAddr {
        self.peer_addr.ip().to_canonical()
    }

    pub async fn run(mut self) -> Disconnect {
        let reason = self.serve().await;

        match &reason {
            Disconnect::Shutdown | Disconnect::Replaced | Disconnect::PeerClosed => {
                tracing::info!(peer = %self.peer_addr, conn_id = self.conn_id, %reason, "household disconnected")
            }
            _ => {
                tracing::warn!(peer = %self.peer_addr, conn_id = self.conn_id, %reason, "household disconnected")
            }
        }

        // Settle the lease before the peer can observe the close.
        let tracker = self.ctx.tracker.clone();
        if reason.releases_lease(self.ctx.release_on_disconnect) {
            tracker
                .release(self.peer(), self.conn_id, &self.ctx.state)
                .await;
        } else {
            tracker.forget(self.peer(), self.conn_id).await;
        }

        let _ = self.stream.shutdown().await;
        reason
    }

    async fn serve(&mut self) -> Disconnect {
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        let idle_timeout = self.ctx.idle_timeout;

        loop {
            buf.clear();

            let read = tokio::select! {
                _ = self.shutdown.recv() => return Disconnect::Shutdown,
                _ = &mut self.retire => return Disconnect::Replaced,
                read = read_request(&mut self.stream, &mut buf, idle_timeout) => read,
            };

            match read {
                Ok(0) => return Disconnect::PeerClosed,
                Ok(_) => {}
                Err(reason) => return reason,
            }

            let frames = match wire::split_frames(&buf) {
                Ok(frames) if frames.is_empty() => return DecodeError::Empty.into(),
                Ok(frames) => frames,
                Err(e) => return e.into(),
            };

            for frame in frames {
                let request = match Request::decode(frame) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(peer = %self.peer_addr, frame, "undecodable request");
                        return e.into();
                    }
                };

                let response = dispatch(&self.ctx, self.peer(), self.conn_id, request).await;
                let encoded = response.encode();
                tracing::debug!(peer = %self.peer_addr, frame, reply = %encoded, "request served");

                if let Err(e) = self.stream.write_all(encoded.as_bytes()).await {
                    return e.into();
                }
            }
        }
    }
}

/// One read from the socket, bounded by the idle timeout when set.
async fn read_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    idle_timeout: Option<Duration>,
) -> Result<usize, Disconnect> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.read_buf(buf)).await {
            Ok(read) => read.map_err(Disconnect::from),
            Err(_) => Err(Disconnect::IdleTimeout(limit)),
        },
        None => stream.read_buf(buf).await.map_err(Disconnect::from),
    }
}

/// Answer one decoded request for connection `conn_id`. Resource-level
/// failures become response values; nothing here closes the connection.
pub async fn dispatch(
    ctx: &ConnectionContext,
    peer: PeerAddr,
    conn_id: u64,
    request: Request,
) -> Response {
    match request {
        Request::RequestNodeIdentity => {
            match ctx.tracker.lease(peer, conn_id, &ctx.state).await {
                Some(Ok(node_id)) => Response::NodeIdentity(Some(node_id)),
                Some(Err(_)) | None => Response::NodeIdentity(None),
            }
        }

        Request::RequestLoad { node_id } => match ctx.state.get_amperage(node_id).await {
            Some(amperage) => Response::Amperage(amperage),
            None => Response::Error(ErrorCode::UnknownNode),
        },

        Request::RequestTradeEstimate(trade) => {
            let params = EstimateParams::for_trade(
                &trade,
                ctx.state.base_voltage(),
                ctx.state.topology(),
            );
            match ctx.estimator.estimate(params).await {
                Ok(value) => Response::TradeEstimate(value),
                Err(EstimationError::Engine(EngineError::InvalidInput(reason))) => {
                    tracing::debug!(%peer, %reason, "trade rejected");
                    Response::Error(ErrorCode::InvalidTrade)
                }
                Err(e) => {
                    tracing::warn!(
                        %peer,
                        buyer = trade.buyer_node_id,
                        seller = trade.seller_node_id,
                        error = %e,
                        "trade estimate failed"
                    );
                    Response::Error(ErrorCode::EstimationUnavailable)
                }
            }
        }
    }
}
