//! Rotate the participant set through a replicated, phase-driven view change.
//!
//! # Overview
//!
//! The view change is a state machine stored in replicated state and advanced by every
//! node exactly once per processed round. Each [Phase] has a minimum dwell (in rounds).
//! Once a phase has dwelt long enough, its move condition is checked against the
//! accumulators in state:
//!
//! | Phase | Condition | Action on success | Next |
//! |---|---|---|---|
//! | Start | enough candidates for `K` | select the DKG set | Contribute |
//! | Contribute | `K` commitments | prune non-contributors | Share |
//! | Share | `K` share-sets | | Publish |
//! | Publish | always | build the magic block | Wait |
//! | Wait | always | activate the magic block | Start |
//!
//! If the condition does not hold (or the action fails), all DKG accumulators are reset
//! and the machine restarts at [Phase::Start] with its restart counter incremented. A
//! successful `Wait -> Start` resets the counter.
//!
//! Evaluation only reads replicated state and the round being processed (never the
//! network or a clock) and every collection is ordered, so all nodes that process the
//! same rounds reach the same state.

mod contract;
mod machine;
pub use machine::ViewChange;
mod state;
mod types;
pub use types::{
    ack_payload, DkgSet, GroupSharesOrSigns, MagicBlock, Member, Mpks, Node, PhaseNode, Pool,
    ShareOrSign, ShareOrSigns, ACK_NAMESPACE,
};

use crate::{NodeId, StoreError};
use bytes::{Buf, BufMut};
use epochal_codec::{Error as CodecError, FixedSize, Read, ReadExt, Write};
use std::fmt::{self, Display};
use thiserror::Error;

/// Well-known keys of the replicated state.
pub mod keys {
    /// The [super::PhaseNode].
    pub const PHASE: &str = "phase";
    /// The [super::DkgSet] of the session in progress.
    pub const DKG_MINERS: &str = "dkg_miners";
    /// The [super::Mpks] contributed in the session in progress.
    pub const MPKS: &str = "mpks";
    /// The [super::GroupSharesOrSigns] submitted in the session in progress.
    pub const GROUP_SHARES_OR_SIGNS: &str = "group_shares_or_signs";
    /// The staged [super::MagicBlock].
    pub const MAGIC_BLOCK: &str = "magic_block";
    /// The active [super::MagicBlock].
    pub const ACTIVE_MAGIC_BLOCK: &str = "active_magic_block";
    /// Sharders that asked to remain in the next epoch.
    pub const SHARDERS_KEEP: &str = "sharders_keep";
    /// Registered validator candidates.
    pub const ALL_MINERS: &str = "all_miners";
    /// Registered sharders.
    pub const ALL_SHARDERS: &str = "all_sharders";
}

/// A phase of the view change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    #[default]
    Start,
    Contribute,
    Share,
    Publish,
    Wait,
}

impl Phase {
    /// Returns the phase that follows a successful commit of this one.
    pub fn next(self) -> Phase {
        transition(self).next
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::Contribute => "contribute",
            Phase::Share => "share",
            Phase::Publish => "publish",
            Phase::Wait => "wait",
        };
        f.write_str(name)
    }
}

impl Write for Phase {
    fn write(&self, buf: &mut impl BufMut) {
        (*self as u8).write(buf);
    }
}

impl Read for Phase {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(Phase::Start),
            1 => Ok(Phase::Contribute),
            2 => Ok(Phase::Share),
            3 => Ok(Phase::Publish),
            4 => Ok(Phase::Wait),
            tag => Err(CodecError::InvalidEnum("Phase", tag)),
        }
    }
}

impl FixedSize for Phase {
    const SIZE: usize = u8::SIZE;
}

/// Predicate that must hold for a phase to advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    /// The candidate pool can fill a DKG set that meets `K`.
    EnoughCandidates,
    /// At least `K` participants contributed a commitment.
    EnoughCommitments,
    /// At least `K` participants submitted shares-or-signs.
    EnoughShareSets,
    /// Always holds.
    Always,
}

/// Replicated state change performed when a phase advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Select and size the DKG set from the candidate pool.
    CreateDkgSet,
    /// Drop DKG participants that did not contribute a commitment.
    PruneDkgSet,
    /// Build and stage the next magic block.
    CreateMagicBlock,
    /// Activate the staged magic block.
    ActivateMagicBlock,
}

/// How a phase advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub condition: Condition,
    pub action: Option<Action>,
    pub next: Phase,
}

/// Returns the transition out of `phase`.
pub fn transition(phase: Phase) -> Transition {
    let (condition, action, next) = match phase {
        Phase::Start => (
            Condition::EnoughCandidates,
            Some(Action::CreateDkgSet),
            Phase::Contribute,
        ),
        Phase::Contribute => (
            Condition::EnoughCommitments,
            Some(Action::PruneDkgSet),
            Phase::Share,
        ),
        Phase::Share => (Condition::EnoughShareSets, None, Phase::Publish),
        Phase::Publish => (
            Condition::Always,
            Some(Action::CreateMagicBlock),
            Phase::Wait,
        ),
        Phase::Wait => (
            Condition::Always,
            Some(Action::ActivateMagicBlock),
            Phase::Start,
        ),
    };
    Transition {
        condition,
        action,
        next,
    }
}

/// Minimum number of rounds spent in each phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseRounds {
    pub start: u64,
    pub contribute: u64,
    pub share: u64,
    pub publish: u64,
    pub wait: u64,
}

impl PhaseRounds {
    /// Returns the dwell of `phase`.
    pub fn get(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Start => self.start,
            Phase::Contribute => self.contribute,
            Phase::Share => self.share,
            Phase::Publish => self.publish,
            Phase::Wait => self.wait,
        }
    }
}

/// Configuration for the [ViewChange].
#[derive(Clone, Debug)]
pub struct Config {
    /// Minimum rounds spent in each phase.
    pub rounds: PhaseRounds,

    /// Minimum number of candidates required to form a DKG set.
    pub min_n: u32,

    /// Maximum size of a DKG set (the highest-staked candidates are kept).
    pub max_n: u32,

    /// `K` as a percentage of `N` (rounded up).
    pub k_percent: u32,

    /// `T` as a percentage of `N` (rounded up).
    pub t_percent: u32,
}

impl Config {
    /// Checks both percentages are in `1..=100` and `min_n <= max_n` (with `max_n > 0`).
    pub fn validate(&self) -> Result<(), Error> {
        for percent in [self.k_percent, self.t_percent] {
            if !(1..=100).contains(&percent) {
                return Err(Error::InvalidPercent(percent));
            }
        }
        if self.max_n == 0 || self.min_n > self.max_n {
            return Err(Error::InvalidBounds {
                min_n: self.min_n,
                max_n: self.max_n,
            });
        }
        Ok(())
    }

    /// Returns `(K, T)` for a DKG set of `n` participants, checking `1 <= K, T <= n`.
    pub fn thresholds(&self, n: u32) -> Result<(u32, u32), Error> {
        let k = ceil_percent(n, self.k_percent);
        let t = ceil_percent(n, self.t_percent);
        if !(1..=n).contains(&k) || !(1..=n).contains(&t) {
            return Err(Error::InvalidThresholds { n, k, t });
        }
        Ok((k, t))
    }
}

/// Returns `ceil(n * percent / 100)`.
pub fn ceil_percent(n: u32, percent: u32) -> u32 {
    ((n as u64 * percent as u64 + 99) / 100) as u32
}

/// Errors that can occur while advancing the view change or applying a transaction.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("state: {0}")]
    State(StoreError),
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: &'static str,
        source: CodecError,
    },
    #[error("wrong phase: expected {expected}, current {current}")]
    WrongPhase { expected: Phase, current: Phase },
    #[error("not part of dkg set: {0}")]
    NotInDkgSet(NodeId),
    #[error("wrong mpk size: expected {expected}, got {got}")]
    WrongMpkSize { expected: u32, got: u32 },
    #[error("already contributed: {0}")]
    AlreadyContributed(NodeId),
    #[error("no mpk contributed: {0}")]
    NoMpk(NodeId),
    #[error("already shared: {0}")]
    AlreadyShared(NodeId),
    #[error("too few shares or signs: {got}/{need}")]
    TooFewShareOrSigns { got: u32, need: u32 },
    #[error("unknown recipient: {0}")]
    UnknownRecipient(NodeId),
    #[error("invalid share or sign for: {0}")]
    InvalidShareOrSign(NodeId),
    #[error("not a registered sharder: {0}")]
    NotSharder(NodeId),
    #[error("sharder already kept: {0}")]
    AlreadyKept(NodeId),
    #[error("move condition failed: {0}")]
    MoveRejected(Phase),
    #[error("too few candidates: {have}/{need}")]
    TooFewCandidates { have: u32, need: u32 },
    #[error("too few survivors: {have}/{need}")]
    TooFewSurvivors { have: u32, need: u32 },
    #[error("no staged magic block")]
    MissingMagicBlock,
    #[error("percentage out of range: {0}")]
    InvalidPercent(u32),
    #[error("invalid set bounds: min_n={min_n}, max_n={max_n}")]
    InvalidBounds { min_n: u32, max_n: u32 },
    #[error("invalid thresholds: n={n}, k={k}, t={t}")]
    InvalidThresholds { n: u32, k: u32, t: u32 },
}

impl Error {
    /// Returns true if the error must abort block processing (rather than restart the
    /// DKG session).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::State(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::State(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochal_codec::{DecodeExt, Encode};

    #[test]
    fn test_cycle_is_exhaustive() {
        let mut phase = Phase::Start;
        let mut visited = Vec::new();
        for _ in 0..5 {
            visited.push(phase);
            phase = phase.next();
        }
        assert_eq!(phase, Phase::Start);
        visited.sort();
        visited.dedup();
        assert_eq!(visited.len(), 5);
    }

    #[test]
    fn test_phase_codec() {
        for phase in [
            Phase::Start,
            Phase::Contribute,
            Phase::Share,
            Phase::Publish,
            Phase::Wait,
        ] {
            assert_eq!(Phase::decode(phase.encode()).unwrap(), phase);
        }
        assert_eq!(
            Phase::decode(&[5u8][..]),
            Err(CodecError::InvalidEnum("Phase", 5))
        );
    }

    #[test]
    fn test_ceil_percent() {
        assert_eq!(ceil_percent(4, 75), 3);
        assert_eq!(ceil_percent(4, 50), 2);
        assert_eq!(ceil_percent(5, 67), 4);
        assert_eq!(ceil_percent(3, 100), 3);
        assert_eq!(ceil_percent(0, 67), 0);
    }

    fn valid() -> Config {
        Config {
            rounds: PhaseRounds {
                start: 1,
                contribute: 1,
                share: 1,
                publish: 1,
                wait: 1,
            },
            min_n: 2,
            max_n: 10,
            k_percent: 75,
            t_percent: 50,
        }
    }

    #[test]
    fn test_validate_config() {
        assert_eq!(valid().validate(), Ok(()));
        for (k_percent, t_percent, bad) in [(0, 50, 0), (150, 50, 150), (75, 0, 0), (75, 200, 200)]
        {
            let config = Config {
                k_percent,
                t_percent,
                ..valid()
            };
            assert_eq!(config.validate(), Err(Error::InvalidPercent(bad)));
        }
        let config = Config {
            min_n: 11,
            ..valid()
        };
        assert_eq!(
            config.validate(),
            Err(Error::InvalidBounds {
                min_n: 11,
                max_n: 10
            })
        );
        let config = Config {
            min_n: 0,
            max_n: 0,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidBounds { .. })));
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(valid().thresholds(4), Ok((3, 2)));
        assert_eq!(valid().thresholds(1), Ok((1, 1)));
        assert_eq!(
            valid().thresholds(0),
            Err(Error::InvalidThresholds { n: 0, k: 0, t: 0 })
        );
        let zero = Config {
            k_percent: 0,
            ..valid()
        };
        assert_eq!(
            zero.thresholds(4),
            Err(Error::InvalidThresholds { n: 4, k: 0, t: 2 })
        );
        let over = Config {
            t_percent: 200,
            ..valid()
        };
        assert_eq!(
            over.thresholds(4),
            Err(Error::InvalidThresholds { n: 4, k: 3, t: 8 })
        );
    }

    #[test]
    fn test_only_state_errors_are_fatal() {
        assert!(Error::State(StoreError::Unavailable("x".into())).is_fatal());
        assert!(!Error::MoveRejected(Phase::Share).is_fatal());
        assert!(!Error::Decode {
            key: keys::PHASE,
            source: CodecError::EndOfBuffer
        }
        .is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Contribute.to_string(), "contribute");
    }
}
