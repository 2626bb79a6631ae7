//! Signatures, threshold signatures and Distributed Key Generation (DKG) over the BLS12-381 curve.
//!
//! Public keys live in G1 and signatures in G2.
//!
//! # Features
//!
//! - `portable`: Enables `portable` feature on `blst` (<https://github.com/supranational/blst?tab=readme-ov-file#platform-and-language-compatibility>).

pub mod dkg;
pub mod primitives;
