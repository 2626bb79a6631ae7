//! Transactions submitted by DKG participants and sharders.

use super::{
    ack_payload, keys, state::Batch, DkgSet, Error, GroupSharesOrSigns, Mpks, Phase, PhaseNode,
    Pool, ShareOrSign, ShareOrSigns, ViewChange, ACK_NAMESPACE,
};
use crate::{NodeId, Reporter, State};
use epochal_cryptography::bls12381::primitives::{group::Share, ops::verify_message, poly};
use tracing::debug;

fn expect_phase<S: State>(batch: &Batch<'_, S>, expected: Phase) -> Result<(), Error> {
    let current = batch.get::<PhaseNode>(keys::PHASE)?.phase;
    if current != expected {
        return Err(Error::WrongPhase { expected, current });
    }
    Ok(())
}

impl<R: Reporter> ViewChange<R> {
    /// Records the commitment `sender` contributes to the session in progress.
    ///
    /// Only accepted during [Phase::Contribute], from DKG participants, once per
    /// participant, and if the commitment has exactly `T` coefficients.
    pub fn contribute_mpk<S: State>(
        &self,
        state: &S,
        sender: &NodeId,
        mpk: poly::Public,
    ) -> Result<(), Error> {
        let _guard = self.guard();
        let mut batch = Batch::new(state);
        expect_phase(&batch, Phase::Contribute)?;
        let dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
        if !dkg.members.contains_key(sender) {
            return Err(Error::NotInDkgSet(sender.clone()));
        }
        let got = mpk.coefficients().len() as u32;
        if got != dkg.t {
            return Err(Error::WrongMpkSize {
                expected: dkg.t,
                got,
            });
        }
        let mut mpks = batch.get::<Mpks>(keys::MPKS)?;
        if mpks.mpks.contains_key(sender) {
            return Err(Error::AlreadyContributed(sender.clone()));
        }
        mpks.mpks.insert(sender.clone(), mpk);
        debug!(%sender, contributed = mpks.mpks.len(), "accepted mpk");
        batch.put(keys::MPKS, &mpks);
        batch.commit()
    }

    /// Records the shares-or-signs `sender` publishes about the shares it dealt.
    ///
    /// Only accepted during [Phase::Share], from participants that contributed a
    /// commitment, once per participant, and if it covers at least `N - 2` recipients.
    /// Every entry must verify: an acknowledgement under the recipient's key or a revealed
    /// share against the sender's commitment. Each revealed share counts against its
    /// recipient.
    pub fn share_signs_or_shares<S: State>(
        &self,
        state: &S,
        sender: &NodeId,
        sos: ShareOrSigns,
    ) -> Result<(), Error> {
        let _guard = self.guard();
        let mut batch = Batch::new(state);
        expect_phase(&batch, Phase::Share)?;
        let mut shares = batch.get::<GroupSharesOrSigns>(keys::GROUP_SHARES_OR_SIGNS)?;
        if shares.shares.contains_key(sender) {
            return Err(Error::AlreadyShared(sender.clone()));
        }
        let mut dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
        let mpks = batch.get::<Mpks>(keys::MPKS)?;
        let commitment = mpks
            .mpks
            .get(sender)
            .ok_or_else(|| Error::NoMpk(sender.clone()))?;
        let got = sos.entries.len() as u32;
        let need = dkg.n.saturating_sub(2);
        if got < need {
            return Err(Error::TooFewShareOrSigns { got, need });
        }

        // Verify everything before counting anything
        let payload = ack_payload(sender, commitment);
        let mut revealed = Vec::new();
        for (recipient, entry) in &sos.entries {
            let member = dkg
                .members
                .get(recipient)
                .ok_or_else(|| Error::UnknownRecipient(recipient.clone()))?;
            let valid = match entry {
                ShareOrSign::Sign(signature) => verify_message(
                    &member.node.public_key,
                    Some(ACK_NAMESPACE),
                    &payload,
                    signature,
                )
                .is_ok(),
                ShareOrSign::Share(private) => {
                    let share = Share {
                        index: member.index,
                        private: *private,
                    };
                    let valid = commitment.evaluate(member.index).value == share.public();
                    if valid {
                        revealed.push(recipient.clone());
                    }
                    valid
                }
            };
            if !valid {
                return Err(Error::InvalidShareOrSign(recipient.clone()));
            }
        }
        for recipient in revealed {
            if let Some(member) = dkg.members.get_mut(&recipient) {
                member.revealed_shares += 1;
            }
        }

        shares.shares.insert(sender.clone(), sos);
        debug!(%sender, submitted = shares.shares.len(), "accepted shares or signs");
        batch.put(keys::GROUP_SHARES_OR_SIGNS, &shares);
        batch.put(keys::DKG_MINERS, &dkg);
        batch.commit()
    }

    /// Asks for registered sharder `sender` to be kept in the next magic block.
    ///
    /// Only accepted during [Phase::Contribute], once per sharder.
    pub fn sharder_keep<S: State>(&self, state: &S, sender: &NodeId) -> Result<(), Error> {
        let _guard = self.guard();
        let mut batch = Batch::new(state);
        expect_phase(&batch, Phase::Contribute)?;
        let sharder = batch
            .get::<Pool>(keys::ALL_SHARDERS)?
            .nodes
            .remove(sender)
            .ok_or_else(|| Error::NotSharder(sender.clone()))?;
        let mut keep = batch.get::<Pool>(keys::SHARDERS_KEEP)?;
        if keep.contains(sender) {
            return Err(Error::AlreadyKept(sender.clone()));
        }
        keep.add(sharder);
        debug!(%sender, kept = keep.len(), "kept sharder");
        batch.put(keys::SHARDERS_KEEP, &keep);
        batch.commit()
    }
}
