//! Stateless operations useful in a DKG.

use crate::bls12381::{
    dkg::Error,
    primitives::{
        group::{Element, Scalar, Share},
        poly,
    },
};
use rand::{CryptoRng, RngCore};

/// Checks `1 <= t <= n`.
pub fn check_threshold(n: u32, t: u32) -> Result<(), Error> {
    if t == 0 || t > n {
        return Err(Error::InvalidThreshold(t, n));
    }
    Ok(())
}

/// Generate a commitment and one share for each of `n` participants, any `t` of which
/// recover the dealt secret.
///
/// # Panics
///
/// Panics if `t` is zero.
pub fn generate_shares<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: u32,
    t: u32,
) -> (poly::Public, Vec<Share>) {
    let secret = poly::new_from(t - 1, rng);
    let commitment = poly::Public::commit(&secret);
    let shares = (0..n)
        .map(|i| {
            let eval = secret.evaluate(i);
            Share {
                index: eval.index,
                private: eval.value,
            }
        })
        .collect::<Vec<_>>();
    (commitment, shares)
}

/// Verify that a dealer's commitment has the degree expected for threshold `t`.
pub fn verify_commitment(commitment: &poly::Public, t: u32) -> Result<(), Error> {
    if commitment.required() != t {
        return Err(Error::CommitmentWrongDegree);
    }
    Ok(())
}

/// Verify that a given share is valid for a specified recipient.
pub fn verify_share(
    commitment: &poly::Public,
    t: u32,
    recipient: u32,
    share: &Share,
) -> Result<(), Error> {
    verify_commitment(commitment, t)?;
    if share.index != recipient {
        return Err(Error::MisdirectedShare);
    }
    let expected = share.public();
    let given = commitment.evaluate(share.index);
    if given.value != expected {
        return Err(Error::ShareWrongCommitment);
    }
    Ok(())
}

/// Construct the group public polynomial by summing all commitments.
pub fn construct_public<'a, I>(commitments: I, required: u32) -> Result<poly::Public, Error>
where
    I: IntoIterator<Item = &'a poly::Public>,
{
    let mut public = poly::Public::zero();
    let mut count = 0u32;
    for commitment in commitments {
        public.add(commitment);
        count += 1;
    }
    if count < required {
        return Err(Error::InsufficientDealings);
    }
    Ok(public)
}

/// Construct a participant's group share by summing the shares it received.
pub fn construct_share<'a, I>(index: u32, shares: I) -> Share
where
    I: IntoIterator<Item = &'a Share>,
{
    let private = shares.into_iter().fold(Scalar::zero(), |mut sum, share| {
        sum.add(&share.private);
        sum
    });
    Share { index, private }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bls12381::primitives::{
        ops::{partial_sign_message, threshold_signature_recover, verify_message},
        poly::public,
    };
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_verify_share() {
        let mut rng = StdRng::seed_from_u64(0);
        let (commitment, shares) = generate_shares(&mut rng, 4, 3);
        for (i, share) in shares.iter().enumerate() {
            verify_share(&commitment, 3, i as u32, share).unwrap();
        }

        // Wrong recipient
        assert_eq!(
            verify_share(&commitment, 3, 1, &shares[0]),
            Err(Error::MisdirectedShare)
        );

        // Wrong threshold
        assert_eq!(
            verify_share(&commitment, 2, 0, &shares[0]),
            Err(Error::CommitmentWrongDegree)
        );

        // Share from another dealing
        let (_, other) = generate_shares(&mut rng, 4, 3);
        assert_eq!(
            verify_share(&commitment, 3, 0, &other[0]),
            Err(Error::ShareWrongCommitment)
        );
    }

    #[test]
    fn test_check_threshold() {
        assert!(check_threshold(4, 1).is_ok());
        assert!(check_threshold(4, 4).is_ok());
        assert_eq!(check_threshold(4, 0), Err(Error::InvalidThreshold(0, 4)));
        assert_eq!(check_threshold(4, 5), Err(Error::InvalidThreshold(5, 4)));
    }

    #[test]
    fn test_joint_dealing() {
        let (n, t) = (4u32, 3u32);
        let mut rng = StdRng::seed_from_u64(1);
        let dealings = (0..n)
            .map(|_| generate_shares(&mut rng, n, t))
            .collect::<Vec<_>>();

        // Each participant sums the shares addressed to it
        let group_shares = (0..n)
            .map(|i| {
                let received = dealings
                    .iter()
                    .map(|(_, shares)| shares[i as usize])
                    .collect::<Vec<_>>();
                construct_share(i, &received)
            })
            .collect::<Vec<_>>();
        let group = construct_public(dealings.iter().map(|(c, _)| c), n).unwrap();

        // Group shares match the group polynomial
        for share in &group_shares {
            assert_eq!(group.evaluate(share.index).value, share.public());
        }

        // And produce a valid threshold signature
        let partials = group_shares
            .iter()
            .map(|s| partial_sign_message(s, None, b"epoch"))
            .collect::<Vec<_>>();
        let signature = threshold_signature_recover(t, &partials).unwrap();
        verify_message(public(&group), None, b"epoch", &signature).unwrap();
    }

    #[test]
    fn test_construct_public_insufficient() {
        let (commitment, _) = generate_shares(&mut StdRng::seed_from_u64(2), 3, 2);
        assert_eq!(
            construct_public([&commitment], 2),
            Err(Error::InsufficientDealings)
        );
    }
}
