//! Digital signatures over the BLS12-381 curve using G1 as the public key (48 bytes)
//! and G2 as the signature (96 bytes).
//!
//! # Domain Separation Tag (DST)
//!
//! All signatures use the `BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_` DST
//! (<https://datatracker.ietf.org/doc/html/draft-irtf-cfrg-bls-signature-05#name-ciphersuites>).

use super::{
    group::{self, equal, Element, Point, Scalar, Share, G2},
    poly::{self, Eval, PartialSignature},
    Error,
};
use epochal_utils::union_unique;
use rand::RngCore;

/// Returns a new keypair derived from the provided randomness.
pub fn keypair<R: RngCore>(rng: &mut R) -> (group::Private, group::Public) {
    let private = Scalar::rand(rng);
    let mut public = group::Public::one();
    public.mul(&private);
    (private, public)
}

/// Hashes the (namespaced) message to G2.
fn hash_message(namespace: Option<&[u8]>, message: &[u8]) -> G2 {
    let mut hm = G2::zero();
    match namespace {
        Some(namespace) => hm.map(&union_unique(namespace, message)),
        None => hm.map(message),
    }
    hm
}

/// Signs the provided message with the private key.
///
/// The message is prefixed with the namespace (when provided) before being hashed.
pub fn sign_message(
    private: &group::Private,
    namespace: Option<&[u8]>,
    message: &[u8],
) -> group::Signature {
    let mut s = hash_message(namespace, message);
    s.mul(private);
    s
}

/// Verifies the signature with the provided public key.
pub fn verify_message(
    public: &group::Public,
    namespace: Option<&[u8]>,
    message: &[u8],
    signature: &group::Signature,
) -> Result<(), Error> {
    let hm = hash_message(namespace, message);
    if !equal(public, signature, &hm) {
        return Err(Error::InvalidSignature);
    }
    Ok(())
}

/// Signs the provided message with the key share.
pub fn partial_sign_message(
    share: &Share,
    namespace: Option<&[u8]>,
    message: &[u8],
) -> PartialSignature {
    Eval {
        index: share.index,
        value: sign_message(&share.private, namespace, message),
    }
}

/// Verifies the partial signature against the public polynomial.
pub fn partial_verify_message(
    public: &poly::Public,
    namespace: Option<&[u8]>,
    message: &[u8],
    partial: &PartialSignature,
) -> Result<(), Error> {
    let share_public = public.evaluate(partial.index).value;
    verify_message(&share_public, namespace, message, &partial.value)
}

/// Recovers a threshold signature from at least `threshold` partial signatures.
///
/// The result depends only on the polynomial the partials were produced with, never on
/// which `threshold`-sized subset (or which order) was supplied.
pub fn threshold_signature_recover<'a, I>(
    threshold: u32,
    partials: I,
) -> Result<group::Signature, Error>
where
    I: IntoIterator<Item = &'a PartialSignature>,
{
    poly::Poly::<group::Signature>::recover(threshold, partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls12381::dkg::ops::generate_shares;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_sign_verify() {
        let (private, public) = keypair(&mut StdRng::seed_from_u64(0));
        let namespace = Some(&b"test"[..]);
        let sig = sign_message(&private, namespace, b"message");
        verify_message(&public, namespace, b"message", &sig).unwrap();

        // Wrong message
        assert_eq!(
            verify_message(&public, namespace, b"other", &sig),
            Err(Error::InvalidSignature)
        );

        // Wrong namespace
        assert_eq!(
            verify_message(&public, None, b"message", &sig),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_threshold_any_subset() {
        let (n, t) = (5, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let (public, shares) = generate_shares(&mut rng, n, t);
        let message = b"round 7";
        let partials = shares
            .iter()
            .map(|s| partial_sign_message(s, None, message))
            .collect::<Vec<_>>();
        for p in &partials {
            partial_verify_message(&public, None, message, p).unwrap();
        }

        let first = threshold_signature_recover(t, &partials[..3]).unwrap();
        let last = threshold_signature_recover(t, &partials[2..]).unwrap();
        let mixed = [partials[4], partials[0], partials[3]];
        let mixed = threshold_signature_recover(t, &mixed).unwrap();
        assert_eq!(first, last);
        assert_eq!(first, mixed);
        verify_message(poly::public(&public), None, message, &first).unwrap();
    }

    #[test]
    fn test_threshold_not_met() {
        let mut rng = StdRng::seed_from_u64(2);
        let (_, shares) = generate_shares(&mut rng, 4, 3);
        let partials = shares
            .iter()
            .take(2)
            .map(|s| partial_sign_message(s, None, b"msg"))
            .collect::<Vec<_>>();
        assert_eq!(
            threshold_signature_recover(3, &partials),
            Err(Error::NotEnoughPartialSignatures(3, 2))
        );
    }

    #[test]
    fn test_partial_wrong_index() {
        let mut rng = StdRng::seed_from_u64(3);
        let (public, shares) = generate_shares(&mut rng, 4, 3);
        let mut partial = partial_sign_message(&shares[0], None, b"msg");
        partial.index = 1;
        assert_eq!(
            partial_verify_message(&public, None, b"msg", &partial),
            Err(Error::InvalidSignature)
        );
    }
}
