//! TCP acceptor — binds the household port and hands each connection to a
//! worker via the tracker.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use gridhub_core::config::NetworkConfig;

use crate::connection::{ConnectionContext, ConnectionWorker};

/// Pause after a failed accept (fd exhaustion and the like).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Acceptor {
    listener: TcpListener,
    ctx: ConnectionContext,
    shutdown: broadcast::Sender<()>,
    grace: Duration,
}

impl Acceptor {
    /// Bind and listen. Must be called from within the runtime.
    pub fn bind(
        network: &NetworkConfig,
        ctx: ConnectionContext,
        shutdown: broadcast::Sender<()>,
    ) -> Result<Self> {
        let ip: IpAddr = network
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind address '{}'", network.bind_addr))?;
        let addr = SocketAddr::new(ip, network.port);

        let listener = make_listener(addr, network.backlog)
            .with_context(|| format!("failed to listen on {addr}"))?;
        let listener =
            TcpListener::from_std(listener).context("failed to register listener with runtime")?;

        tracing::info!(addr = %listener.local_addr()?, backlog = network.backlog, "listening for households");

        Ok(Self {
            listener,
            ctx,
            shutdown,
            grace: network.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown, then give workers `shutdown_grace` to finish.
    pub async fn run(self) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("acceptor shutting down");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.admit(stream, peer_addr).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(self.listener);
        self.ctx.tracker.drain(self.grace).await;
        Ok(())
    }

    async fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let peer = peer_addr.ip().to_canonical();
        tracing::info!(peer = %peer_addr, "household connected");

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer_addr, error = %e, "TCP_NODELAY not set");
        }

        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.subscribe();
        self.ctx
            .tracker
            .admit(peer, &self.ctx.state, move |conn_id, retire| {
                tokio::spawn(
                    ConnectionWorker::new(stream, peer_addr, conn_id, ctx, shutdown, retire).run(),
                )
            })
            .await;
    }
}

fn make_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    Ok(socket.into())
}
