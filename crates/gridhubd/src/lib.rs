//! gridhubd — rendezvous server for household trading nodes.
//!
//! The binary in `main.rs` wires these pieces together; tests start the
//! same acceptor in-process on a loopback port.

pub mod acceptor;
pub mod connection;
pub mod tracker;

pub use acceptor::Acceptor;
pub use connection::{dispatch, ConnectionContext, ConnectionWorker, Disconnect};
pub use tracker::WorkerTracker;
