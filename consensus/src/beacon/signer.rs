use super::{message, Error, NAMESPACE};
use epochal_cryptography::{
    bls12381::primitives::{
        group::{Share, Signature},
        ops::{
            partial_sign_message, partial_verify_message, threshold_signature_recover,
            verify_message,
        },
        poly::{self, PartialSignature},
    },
    Digest,
};

/// Produces and combines partial signatures over round messages with a group share.
#[derive(Clone, Debug)]
pub struct Signer {
    share: Share,
    public: poly::Public,
    threshold: u32,
}

impl Signer {
    /// Creates a signer from the output of a DKG session.
    ///
    /// `public` must have been produced for `threshold` (it has exactly `threshold`
    /// coefficients).
    pub fn new(share: Share, public: poly::Public, threshold: u32) -> Result<Self, Error> {
        if threshold == 0 || public.required() != threshold {
            return Err(Error::InvalidThreshold(threshold));
        }
        Ok(Self {
            share,
            public,
            threshold,
        })
    }

    /// Returns the index of this node's share.
    pub fn index(&self) -> u32 {
        self.share.index
    }

    /// Returns the number of partial signatures required to recover a signature.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the group public polynomial.
    pub fn public(&self) -> &poly::Public {
        &self.public
    }

    /// Partially signs the message for `round` built over the previous round's output.
    pub fn sign_round(&self, round: u64, previous: &Digest) -> PartialSignature {
        partial_sign_message(&self.share, Some(NAMESPACE), &message(round, previous))
    }

    /// Verifies a partial signature for `round` against the signer's public key share.
    pub fn verify_share(
        &self,
        round: u64,
        previous: &Digest,
        partial: &PartialSignature,
    ) -> Result<(), Error> {
        partial_verify_message(
            &self.public,
            Some(NAMESPACE),
            &message(round, previous),
            partial,
        )
        .map_err(|_| Error::ShareInvalid(partial.index))
    }

    /// Combines at least `threshold` partial signatures for `round` into the group
    /// signature.
    ///
    /// Every supplied partial is verified first: the first invalid one is reported as
    /// [Error::ShareInvalid]. The result does not depend on which (or in what order)
    /// valid partials are supplied.
    pub fn combine_shares(
        &self,
        round: u64,
        previous: &Digest,
        shares: &[PartialSignature],
    ) -> Result<Signature, Error> {
        let have = shares.len() as u32;
        if have < self.threshold {
            return Err(Error::ThresholdNotMet {
                have,
                need: self.threshold,
            });
        }
        let message = message(round, previous);
        for partial in shares {
            partial_verify_message(&self.public, Some(NAMESPACE), &message, partial)
                .map_err(|_| Error::ShareInvalid(partial.index))?;
        }
        let signature =
            threshold_signature_recover(self.threshold, shares).map_err(Error::Recovery)?;
        verify_message(
            poly::public(&self.public),
            Some(NAMESPACE),
            &message,
            &signature,
        )
        .map_err(Error::Recovery)?;
        Ok(signature)
    }
}
