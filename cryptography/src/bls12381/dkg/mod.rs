//! Stateless operations for a Joint-Feldman Distributed Key Generation (DKG).
//!
//! Every dealer samples a secret polynomial of degree `t - 1`, publishes a commitment to
//! it, and sends participant `i` the evaluation at `i + 1`. A participant verifies each
//! share against its dealer's commitment. Once shares from every dealer are accepted, the
//! participant's group share is the sum of its received shares and the group public
//! polynomial is the sum of all commitments. The group secret is never reconstructed.
//!
//! Coordinating dealings over the network (and deciding when enough have been received)
//! is left to the caller.

pub mod ops;

use thiserror::Error;

/// Errors that can occur during a DKG.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("commitment has wrong degree")]
    CommitmentWrongDegree,
    #[error("misdirected share")]
    MisdirectedShare,
    #[error("share does not match commitment")]
    ShareWrongCommitment,
    #[error("insufficient dealings")]
    InsufficientDealings,
    #[error("invalid threshold: t={0}, n={1}")]
    InvalidThreshold(u32, u32),
}
