//! Messages exchanged between peers.

use bytes::{Buf, BufMut};
use epochal_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use epochal_cryptography::bls12381::primitives::{
    group::{Share, Signature},
    poly,
};

/// Maximum number of participants a message may describe.
pub const MAX_PARTICIPANTS: usize = 1024;

const DKG_TAG: u8 = 0;
const VRF_TAG: u8 = 1;

/// A message sent to a peer.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// A dealer's share for the recipient.
    Dkg(DkgShare),
    /// A partial signature over a round's message.
    Vrf(VrfShare),
}

/// A dealer's commitment and the share it dealt to the recipient.
#[derive(Clone, Debug, PartialEq)]
pub struct DkgShare {
    /// Session the share belongs to.
    pub session: u64,
    /// Commitment to the dealer's polynomial.
    pub commitment: poly::Public,
    /// Evaluation of the dealer's polynomial at the recipient's index.
    pub share: Share,
}

/// A participant's contribution to a round's beacon.
#[derive(Clone, Debug, PartialEq)]
pub struct VrfShare {
    /// Round the share contributes to.
    pub round: u64,
    /// Partial signature over the round's message (absent when the beacon runs without
    /// threshold keys).
    pub signature: Option<Signature>,
}

impl Write for Message {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Message::Dkg(dkg) => {
                DKG_TAG.write(buf);
                dkg.session.write(buf);
                dkg.commitment.write(buf);
                dkg.share.write(buf);
            }
            Message::Vrf(vrf) => {
                VRF_TAG.write(buf);
                vrf.round.write(buf);
                vrf.signature.write(buf);
            }
        }
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        1 + match self {
            Message::Dkg(dkg) => {
                dkg.session.encode_size()
                    + dkg.commitment.encode_size()
                    + dkg.share.encode_size()
            }
            Message::Vrf(vrf) => vrf.round.encode_size() + vrf.signature.encode_size(),
        }
    }
}

impl Read for Message {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            DKG_TAG => {
                let session = u64::read(buf)?;
                let commitment =
                    poly::Public::read_cfg(buf, &RangeCfg::from(1..=MAX_PARTICIPANTS))?;
                let share = Share::read(buf)?;
                Ok(Message::Dkg(DkgShare {
                    session,
                    commitment,
                    share,
                }))
            }
            VRF_TAG => {
                let round = u64::read(buf)?;
                let signature = Option::<Signature>::read(buf)?;
                Ok(Message::Vrf(VrfShare { round, signature }))
            }
            tag => Err(CodecError::InvalidEnum("Message", tag)),
        }
    }
}
