//! Configuration system for gridhub.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GRIDHUB_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gridhub/config.toml
//!   3. ~/.config/gridhub/config.toml

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::grid::{self, Edge, NodeId, Topology, TRADE_SLOTS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridhubConfig {
    pub network: NetworkConfig,
    pub grid: GridConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the household listener binds to.
    pub bind_addr: String,
    /// TCP port. 0 = OS-assigned.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Close a connection and release its node after this many silent
    /// seconds. 0 = never.
    pub idle_timeout_secs: u64,
    /// Release a peer's node as soon as its connection ends, instead of
    /// waiting for it to reconnect.
    pub release_on_disconnect: bool,
    /// How long shutdown waits for connection workers to finish.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Volts at the transformer.
    pub base_voltage: f64,
    /// Nodes with a load record, in table order.
    pub load_nodes: Vec<NodeId>,
    /// Nodes handed out to households, a subset of `load_nodes`.
    pub assignable_nodes: Vec<NodeId>,
    /// Amperage per load node applied at startup.
    pub initial_load: Vec<f64>,
    /// Kept last so it serializes after the plain values.
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Built-in radial line-loss model.
    Radial,
    /// External program spoken to over stdin/stdout.
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Program to run when `kind = "process"`.
    pub command: String,
    pub args: Vec<String>,
    /// Per-request deadline. 0 = wait forever.
    pub timeout_ms: u64,
    /// Requests allowed to wait for the engine.
    pub queue_depth: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 6666,
            backlog: 16,
            idle_timeout_secs: 0,
            release_on_disconnect: false,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            base_voltage: grid::DEFAULT_BASE_VOLTAGE,
            load_nodes: grid::reference_load_nodes(),
            assignable_nodes: grid::reference_assignable_nodes(),
            initial_load: grid::reference_initial_load(),
            edges: grid::reference_edges(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Radial,
            command: String::new(),
            args: Vec::new(),
            timeout_ms: 10_000,
            queue_depth: 64,
        }
    }
}

impl NetworkConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl GridConfig {
    pub fn topology(&self) -> Topology {
        Topology::new(self.edges.clone())
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gridhub")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GridhubConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            GridhubConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GRIDHUB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GridhubConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply GRIDHUB_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GRIDHUB_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Ok(v) = std::env::var("GRIDHUB_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("GRIDHUB_NETWORK__BACKLOG") {
            if let Ok(b) = v.parse() {
                self.network.backlog = b;
            }
        }
        if let Ok(v) = std::env::var("GRIDHUB_NETWORK__IDLE_TIMEOUT_SECS") {
            if let Ok(t) = v.parse() {
                self.network.idle_timeout_secs = t;
            }
        }
        if let Ok(v) = std::env::var("GRIDHUB_NETWORK__RELEASE_ON_DISCONNECT") {
            self.network.release_on_disconnect = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("GRIDHUB_ENGINE__KIND") {
            match v.as_str() {
                "radial" => self.engine.kind = EngineKind::Radial,
                "process" => self.engine.kind = EngineKind::Process,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("GRIDHUB_ENGINE__COMMAND") {
            self.engine.command = v;
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let grid = &self.grid;

        if !(grid.base_voltage.is_finite() && grid.base_voltage > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "grid.base_voltage must be positive, got {}",
                grid.base_voltage
            )));
        }
        if grid.edges.is_empty() {
            return Err(ConfigError::Invalid("grid.edges is empty".into()));
        }
        if grid.load_nodes.len() != TRADE_SLOTS {
            return Err(ConfigError::Invalid(format!(
                "grid.load_nodes must list {TRADE_SLOTS} nodes, got {}",
                grid.load_nodes.len()
            )));
        }

        // Load slot i is the load at the destination of edge i.
        let destinations: Vec<NodeId> = grid.edges.iter().map(|e| e.destination).collect();
        if destinations != grid.load_nodes {
            return Err(ConfigError::Invalid(format!(
                "grid.load_nodes {:?} must match edge destinations {:?}",
                grid.load_nodes, destinations
            )));
        }

        let mut seen = HashSet::new();
        if !grid.load_nodes.iter().all(|n| seen.insert(*n)) {
            return Err(ConfigError::Invalid("grid.load_nodes has duplicates".into()));
        }

        let mut assigned = HashSet::new();
        for node in &grid.assignable_nodes {
            if !assigned.insert(*node) {
                return Err(ConfigError::Invalid(format!(
                    "grid.assignable_nodes lists {node} twice"
                )));
            }
            if !seen.contains(node) {
                return Err(ConfigError::Invalid(format!(
                    "assignable node {node} has no load record"
                )));
            }
        }

        if grid.initial_load.len() != grid.load_nodes.len() {
            return Err(ConfigError::Invalid(format!(
                "grid.initial_load has {} values for {} load nodes",
                grid.initial_load.len(),
                grid.load_nodes.len()
            )));
        }

        if self.engine.kind == EngineKind::Process && self.engine.command.is_empty() {
            return Err(ConfigError::Invalid(
                "engine.kind = \"process\" needs engine.command".into(),
            ));
        }
        if self.engine.queue_depth == 0 {
            return Err(ConfigError::Invalid("engine.queue_depth must be > 0".into()));
        }

        Ok(())
    }
}
