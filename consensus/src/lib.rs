//! Produce per-round randomness and rotate the validator set with threshold BLS.
//!
//! # Overview
//!
//! Two cooperating halves make up the consensus core:
//!
//! * A best-effort networked half ([dkg], [beacon]) that jointly derives a threshold key
//!   among the epoch's validators and then, every round, combines `K` partial signatures
//!   over the previous round's output into the next random beacon.
//! * A deterministic replicated half ([viewchange]) that every node executes identically
//!   while processing blocks. It walks a phase cycle (`Start -> Contribute -> Share ->
//!   Publish -> Wait`) that selects the next epoch's participants, collects their
//!   commitments and shares, and commits a new magic block.
//!
//! Storage, transport and round scheduling are provided by the caller through the
//! traits in this module.
//!
//! # Status
//!
//! `epochal-consensus` is **ALPHA** software and is not yet recommended for production use.

use bytes::Bytes;
use futures::Future;
use rand::seq::SliceRandom;
use thiserror::Error;

pub mod beacon;
pub mod dkg;
pub mod handler;
pub mod mocks;
pub mod roster;
pub mod viewchange;
pub mod wire;

/// Identity of a node (validator or sharder).
pub type NodeId = String;

/// A member of a participant set with its epoch-stable index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Participant {
    /// Index used to derive the participant's evaluation point (`index + 1`).
    pub index: u32,
    /// Identity of the participant.
    pub id: NodeId,
}

/// Errors returned by a [State] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state unavailable: {0}")]
    Unavailable(String),
    #[error("state corrupted: {0}")]
    Corrupted(String),
}

/// Replicated key-value state, scoped to the block being processed.
///
/// Writes made while processing a block only become durable if the block is committed,
/// so returning an error from any write aborts the enclosing block-processing step.
pub trait State: Send + Sync {
    /// Returns the value stored at `key` (or `None` if it was never written).
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Stores `value` at `key`.
    fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;
}

/// Roster is the interface responsible for enumerating the participants of an epoch.
pub trait Roster: Clone + Send + Sync + 'static {
    /// Returns all participants, sorted by index.
    fn participants(&self) -> &[Participant];

    /// Returns the index of `id` (if it is a participant).
    fn index(&self, id: &NodeId) -> Option<u32>;

    /// Returns the participants in random order.
    ///
    /// Used to vary the order in which peers are contacted so no peer is systematically
    /// served last.
    fn shuffled(&self) -> Vec<Participant> {
        let mut participants = self.participants().to_vec();
        participants.shuffle(&mut rand::thread_rng());
        participants
    }
}

/// Sender is the interface responsible for unicasting a payload to a peer.
///
/// Delivery is not guaranteed. Callers log failures and rely on periodic rebroadcast.
pub trait Sender: Clone + Send + Sync + 'static {
    /// Error returned when a send could not be attempted.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `payload` to `recipient`.
    fn send(
        &mut self,
        recipient: &NodeId,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Advancer is the interface responsible for starting a round once its seed is known.
pub trait Advancer: Send + Sync + 'static {
    /// Starts `round` with `seed`.
    ///
    /// Invoked exactly once per round.
    fn start_round(&self, round: u64, seed: u64);
}

/// Finalized is the interface responsible for reporting the latest finalized round.
pub trait Finalized: Send + Sync + 'static {
    /// Returns the latest finalized round.
    fn latest_finalized(&self) -> u64;
}

/// Reporter is the interface responsible for observing view-change progress.
pub trait Reporter: Send + Sync + 'static {
    /// Called with the new phase every time the view-change machine advances (but not
    /// when it restarts).
    fn phase(&self, phase: viewchange::Phase, round: u64);
}
