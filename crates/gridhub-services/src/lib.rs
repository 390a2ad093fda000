//! gridhub-services — shared grid state, node leasing, and estimation.

pub mod engine;
pub mod estimation;
pub mod grid_state;
pub mod load_table;
pub mod node_pool;
pub mod process_engine;
pub mod radial_engine;

pub use engine::{EngineError, EstimateParams, EstimationEngine};
pub use estimation::{normalize_estimate, EstimationClient, EstimationError};
pub use grid_state::GridState;
pub use load_table::{GridError, LoadTable};
pub use node_pool::{LeaseError, NodePool, PeerAddr};
pub use process_engine::ProcessEngine;
pub use radial_engine::RadialFlowEngine;
