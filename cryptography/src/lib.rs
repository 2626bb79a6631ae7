//! Generate keys, sign round messages, and jointly derive threshold keys.
//!
//! # Status
//!
//! `epochal-cryptography` is **ALPHA** software and is not yet recommended for production use.

pub mod bls12381;
pub mod sha256;
pub use sha256::{hash, Digest, Sha256};
