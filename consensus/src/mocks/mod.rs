//! Mock implementations of the traits consumed by the consensus core, for tests and
//! simulations.

pub mod advancer;
pub mod network;
pub mod reporter;
pub mod state;
