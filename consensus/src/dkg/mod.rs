//! Run a Joint-Feldman Distributed Key Generation (DKG) session among an epoch's participants.
//!
//! # Overview
//!
//! Every participant deals a fresh polynomial of degree `K - 1`, sends the evaluation at
//! each peer's index (together with a commitment to the polynomial) to that peer, and
//! collects the shares dealt to it. Delivery is best-effort: a background loop rebroadcasts
//! this node's shares on a fixed interval until the session completes, and duplicate
//! deliveries are ignored.
//!
//! Unlike threshold signing, aggregation requires a share from **every** participant. Once
//! all `N` shares are accepted, the [Manager] sums them into this node's group share (and
//! sums all commitments into the group public polynomial) exactly once and wakes every
//! waiter.
//!
//! # Liveness
//!
//! [Manager::wait_until_complete] never times out: if any participant never delivers its
//! share, the session never completes. Use [Manager::wait_or_cancel] to bound the wait.

mod manager;
pub use manager::Manager;
mod store;
pub use store::Store;

use crate::NodeId;
use epochal_cryptography::bls12381::{
    dkg::Error as DkgError,
    primitives::{group::Share, poly},
};
use std::time::Duration;
use thiserror::Error;

/// Configuration for a DKG session.
#[derive(Clone)]
pub struct Config<R> {
    /// Identity of this node.
    pub me: NodeId,

    /// Session number (the number of the magic block the session produces keys for).
    pub session: u64,

    /// Participants of the session (`N` is their count).
    pub roster: R,

    /// Number of shares required to recover a signature (`K`).
    pub threshold: u32,

    /// Interval between rebroadcasts of this node's shares.
    pub rebroadcast: Duration,
}

/// Result of a completed session.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
    /// Group public polynomial (its constant term is the group public key).
    pub public: poly::Public,

    /// This node's share of the group secret.
    pub share: Share,
}

/// Errors that can occur during a DKG session.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("not a participant: {0}")]
    NotParticipant(NodeId),
    #[error("unknown dealer: {0}")]
    UnknownDealer(u32),
    #[error("invalid share from {0}: {1}")]
    InvalidShare(u32, DkgError),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(DkgError),
    #[error("incomplete: {received}/{expected} shares")]
    Incomplete { received: u32, expected: u32 },
    #[error("cancelled")]
    Cancelled,
}
