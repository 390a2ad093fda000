//! gridhub-core — grid model, household wire protocol, and configuration.
//! All other gridhub crates depend on this one.

pub mod config;
pub mod grid;
pub mod wire;

pub use grid::{Edge, NodeId, Topology, TradeRequest};
pub use wire::{DecodeError, ErrorCode, Request, Response};
