//! Derive per-round randomness from threshold BLS signatures.
//!
//! # Overview
//!
//! Every round `R` has a beacon: a seed (used to start the round) and an output digest
//! (signed over by round `R + 1`). To produce the beacon for round `R`, each participant
//! partially signs `message(R, output(R - 1))` with its group share and sends the result
//! (a "VRF share") to its peers. Once `K` shares for round `R` are recorded (and the
//! beacon for `R - 1` is known), the [Driver] recovers the threshold signature, derives
//! the round's seed from it, and starts the round.
//!
//! Because any `K` valid partial signatures recover the same threshold signature, every
//! node derives the same seed regardless of which shares it received first.
//!
//! Round `0` is genesis: its output is the hash of a well-known constant and its seed is
//! configured. The message for round `1` is therefore fixed.
//!
//! # Development Mode
//!
//! Without threshold keys ([Mode::Development]), a round's seed is drawn from a
//! pseudo-random generator seeded with the previous round's seed once `K` (unsigned)
//! shares arrive. Nodes only agree on seeds if they agree on the genesis seed and nothing
//! else perturbs the chain: this mode is not safe for multi-node consensus.

mod driver;
pub use driver::{Driver, Outcome};
mod round;
mod signer;
pub use signer::Signer;

use epochal_cryptography::{
    bls12381::primitives::{group::Signature, Error as PrimitivesError},
    hash, Digest,
};
use epochal_codec::Encode;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;

/// Namespace for partial signatures over round messages.
pub const NAMESPACE: &[u8] = b"_VRF";

/// Constant hashed into the genesis beacon's output.
pub const GENESIS: &[u8] = b"epochal:genesis";

/// Errors that can occur while producing a beacon.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("threshold not met: {have}/{need}")]
    ThresholdNotMet { have: u32, need: u32 },
    #[error("invalid share from {0}")]
    ShareInvalid(u32),
    #[error("missing signature")]
    MissingSignature,
    #[error("predecessor pending: {0}")]
    PredecessorPending(u64),
    #[error("invalid threshold: {0}")]
    InvalidThreshold(u32),
    #[error("recovery failed: {0}")]
    Recovery(PrimitivesError),
}

/// The agreed randomness of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    /// Round the beacon belongs to.
    pub round: u64,
    /// Seed the round is started with.
    pub seed: u64,
    /// Digest the next round's message is built over.
    pub output: Digest,
}

impl Beacon {
    /// Returns the beacon of round `0`.
    pub fn genesis(seed: u64) -> Self {
        Self {
            round: 0,
            seed,
            output: hash(GENESIS),
        }
    }

    /// Derives the beacon of `round` from its recovered threshold signature.
    pub fn threshold(round: u64, signature: &Signature) -> Self {
        let output = hash(&signature.encode());
        Self {
            round,
            seed: output.prefix_u64(),
            output,
        }
    }

    /// Derives the beacon of the round following `previous` without threshold keys.
    pub fn development(previous: &Beacon) -> Self {
        let seed = StdRng::seed_from_u64(previous.seed).gen::<u64>();
        Self {
            round: previous.round + 1,
            seed,
            output: hash(&seed.to_be_bytes()),
        }
    }
}

/// Returns the message participants sign for `round` given the output of the previous
/// round.
pub fn message(round: u64, previous: &Digest) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + previous.as_ref().len());
    message.extend_from_slice(&round.to_be_bytes());
    message.extend_from_slice(previous.as_ref());
    message
}

/// How beacons are derived.
#[derive(Clone)]
pub enum Mode {
    /// Recover threshold signatures with this node's group share.
    Threshold(Signer),
    /// Draw seeds from a pseudo-random generator (not consensus-safe).
    Development,
}

/// Configuration for the [Driver].
#[derive(Clone)]
pub struct Config<A, F> {
    /// Index of this node in the epoch.
    pub me: u32,

    /// Number of shares required to derive a round's beacon (`K`).
    pub threshold: u32,

    /// How beacons are derived.
    pub mode: Mode,

    /// Seed of the genesis round.
    pub genesis_seed: u64,

    /// Deriving a beacon slower than this logs a warning.
    pub slow_beacon: Duration,

    /// How many rounds past the latest finalized round shares are accepted for (shares
    /// for later rounds are stale).
    pub max_ahead: u64,

    /// Started once per round when its beacon is derived.
    pub advancer: A,

    /// Source of the latest finalized round (shares for older rounds are stale).
    pub finalized: F,
}
