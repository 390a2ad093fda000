//! gridhubd integration test harness.
//!
//! Each test starts its own server in-process on an OS-assigned loopback
//! port and talks to it over real TCP. Distinct households are simulated by
//! binding the client socket to distinct 127.0.0.x source addresses, which
//! Linux routes without any setup. Tests that need more than one household
//! skip where those aliases are unavailable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use gridhub_core::config::{GridConfig, NetworkConfig};
use gridhub_services::{
    EngineError, EstimateParams, EstimationClient, EstimationEngine, GridState, RadialFlowEngine,
};
use gridhubd::{Acceptor, ConnectionContext, WorkerTracker};

mod leasing;
mod requests;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long any single read waits before the test gives up.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: GridState,
    estimator: EstimationClient,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

pub struct ServerOptions {
    pub network: NetworkConfig,
    pub grid: GridConfig,
    pub engine: Box<dyn EstimationEngine>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                bind_addr: "127.0.0.1".into(),
                port: 0,
                shutdown_grace_ms: 500,
                ..NetworkConfig::default()
            },
            grid: GridConfig::default(),
            engine: Box::new(RadialFlowEngine::new()),
        }
    }
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(ServerOptions::default()).await
    }

    pub async fn start_with(options: ServerOptions) -> Result<Self> {
        let state = GridState::from_config(&options.grid)?;
        let estimator = EstimationClient::start(options.engine, 16, Some(Duration::from_secs(2)))?;
        let (shutdown, _) = broadcast::channel(1);

        let ctx = ConnectionContext {
            state: state.clone(),
            estimator: estimator.clone(),
            tracker: WorkerTracker::shared(),
            idle_timeout: options.network.idle_timeout(),
            release_on_disconnect: options.network.release_on_disconnect,
        };
        let acceptor = Acceptor::bind(&options.network, ctx, shutdown.clone())?;
        let addr = acceptor.local_addr()?;
        let task = tokio::spawn(acceptor.run());

        Ok(Self {
            addr,
            state,
            estimator,
            shutdown,
            task,
        })
    }

    /// Connect as household `127.0.0.<octet>`.
    pub async fn connect_from(&self, octet: u8) -> Result<TcpStream> {
        let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, octet)), 0);
        let socket = TcpSocket::new_v4()?;
        socket
            .bind(source)
            .with_context(|| format!("failed to bind client to {source}"))?;
        let stream = socket.connect(self.addr).await?;
        Ok(stream)
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .context("server did not stop")???;
        self.estimator.shutdown().await;
        Ok(())
    }

    /// Wait until `node_id` is back in the pool.
    pub async fn wait_for_free_node(&self, node_id: u32) -> Result<()> {
        for _ in 0..100 {
            if self.state.available_nodes().await.contains(&node_id) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        bail!("node {node_id} was never released")
    }
}

/// Whether 127.0.0.x source addresses other than .1 can be bound here.
pub fn loopback_aliases_available() -> bool {
    std::net::TcpListener::bind("127.0.0.2:0").is_ok()
}

pub fn skip_unless_aliases() -> bool {
    if !loopback_aliases_available() {
        eprintln!("SKIP: 127.0.0.x aliases not routable on this host");
        return false;
    }
    true
}

/// Read until `count` `;`-terminated replies have arrived.
pub async fn read_replies(stream: &mut TcpStream, count: usize) -> Result<String> {
    let mut reply = Vec::new();
    let mut buf = [0u8; 256];
    while reply.iter().filter(|&&b| b == b';').count() < count {
        let n = tokio::time::timeout(REPLY_TIMEOUT, stream.read(&mut buf))
            .await
            .context("timed out waiting for reply")??;
        if n == 0 {
            bail!(
                "connection closed after {:?}",
                String::from_utf8_lossy(&reply)
            );
        }
        reply.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8(reply)?)
}

/// Send one request and return its reply.
pub async fn request(stream: &mut TcpStream, message: &str) -> Result<String> {
    stream.write_all(message.as_bytes()).await?;
    read_replies(stream, 1).await
}

/// Assert the server closes `stream` without sending anything further.
pub async fn expect_closed(stream: &mut TcpStream) -> Result<()> {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(REPLY_TIMEOUT, stream.read(&mut buf)).await {
        Err(_) => bail!("connection still open"),
        Ok(Ok(0)) => Ok(()),
        Ok(Ok(n)) => bail!("unexpected bytes {:?}", String::from_utf8_lossy(&buf[..n])),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(()),
        Ok(Err(e)) => Err(e.into()),
    }
}

/// Engine that always fails, standing in for a crashed solver.
pub struct FailingEngine;

impl EstimationEngine for FailingEngine {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn estimate(&mut self, _: &EstimateParams) -> Result<f64, EngineError> {
        Err(EngineError::Unavailable("solver crashed".into()))
    }
}
