//! Records stored in replicated state.

use super::Phase;
use crate::{wire::MAX_PARTICIPANTS, NodeId};
use bytes::{Buf, BufMut};
use epochal_codec::{EncodeSize, Error as CodecError, RangeCfg, Read, ReadExt, Write};
use epochal_cryptography::{
    bls12381::primitives::{
        group::{self, Scalar, Signature},
        poly,
    },
    Digest, Sha256,
};
use std::collections::BTreeMap;

/// Namespace of acknowledgement signatures over a dealer's commitment.
pub const ACK_NAMESPACE: &[u8] = b"_ACK";

const MAX_ID_LENGTH: usize = 128;
const MAX_HOST_LENGTH: usize = 256;

fn id_cfg() -> RangeCfg {
    RangeCfg::from(1..=MAX_ID_LENGTH)
}

fn read_map<V: Read>(buf: &mut impl Buf, cfg: &V::Cfg) -> Result<BTreeMap<NodeId, V>, CodecError> {
    BTreeMap::read_cfg(
        buf,
        &(RangeCfg::from(..=MAX_PARTICIPANTS), (id_cfg(), cfg.clone())),
    )
}

/// Returns the payload a recipient signs to acknowledge `dealer`'s commitment.
pub fn ack_payload(dealer: &NodeId, commitment: &poly::Public) -> Vec<u8> {
    let mut payload = Vec::with_capacity(dealer.encode_size() + commitment.encode_size());
    dealer.write(&mut payload);
    commitment.write(&mut payload);
    payload
}

/// A registered validator or sharder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Key used to sign acknowledgements.
    pub public_key: group::Public,
    pub host: String,
    pub port: u16,
    pub stake: u64,
}

impl Write for Node {
    fn write(&self, buf: &mut impl BufMut) {
        self.id.write(buf);
        self.public_key.write(buf);
        self.host.write(buf);
        self.port.write(buf);
        self.stake.write(buf);
    }
}

impl EncodeSize for Node {
    fn encode_size(&self) -> usize {
        self.id.encode_size()
            + self.public_key.encode_size()
            + self.host.encode_size()
            + self.port.encode_size()
            + self.stake.encode_size()
    }
}

impl Read for Node {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            id: String::read_cfg(buf, &id_cfg())?,
            public_key: group::Public::read(buf)?,
            host: String::read_cfg(buf, &RangeCfg::from(..=MAX_HOST_LENGTH))?,
            port: u16::read(buf)?,
            stake: u64::read(buf)?,
        })
    }
}

/// Nodes keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pool {
    pub nodes: BTreeMap<NodeId, Node>,
}

impl Pool {
    /// Adds `node`, replacing any node with the same id.
    pub fn add(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Write for Pool {
    fn write(&self, buf: &mut impl BufMut) {
        self.nodes.write(buf);
    }
}

impl EncodeSize for Pool {
    fn encode_size(&self) -> usize {
        self.nodes.encode_size()
    }
}

impl Read for Pool {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            nodes: read_map(buf, &())?,
        })
    }
}

/// A participant of a DKG session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub node: Node,
    /// Index of the participant (its evaluation point is `index + 1`).
    pub index: u32,
    /// Number of dealers that revealed the share they dealt to this participant.
    pub revealed_shares: u32,
}

impl Write for Member {
    fn write(&self, buf: &mut impl BufMut) {
        self.node.write(buf);
        self.index.write(buf);
        self.revealed_shares.write(buf);
    }
}

impl EncodeSize for Member {
    fn encode_size(&self) -> usize {
        self.node.encode_size() + self.index.encode_size() + self.revealed_shares.encode_size()
    }
}

impl Read for Member {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            node: Node::read(buf)?,
            index: u32::read(buf)?,
            revealed_shares: u32::read(buf)?,
        })
    }
}

/// Participants and parameters of the DKG session in progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DkgSet {
    pub n: u32,
    pub k: u32,
    pub t: u32,
    pub members: BTreeMap<NodeId, Member>,
}

impl Write for DkgSet {
    fn write(&self, buf: &mut impl BufMut) {
        self.n.write(buf);
        self.k.write(buf);
        self.t.write(buf);
        self.members.write(buf);
    }
}

impl EncodeSize for DkgSet {
    fn encode_size(&self) -> usize {
        self.n.encode_size()
            + self.k.encode_size()
            + self.t.encode_size()
            + self.members.encode_size()
    }
}

impl Read for DkgSet {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            n: u32::read(buf)?,
            k: u32::read(buf)?,
            t: u32::read(buf)?,
            members: read_map(buf, &())?,
        })
    }
}

/// Commitments contributed by DKG participants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mpks {
    pub mpks: BTreeMap<NodeId, poly::Public>,
}

impl Write for Mpks {
    fn write(&self, buf: &mut impl BufMut) {
        self.mpks.write(buf);
    }
}

impl EncodeSize for Mpks {
    fn encode_size(&self) -> usize {
        self.mpks.encode_size()
    }
}

impl Read for Mpks {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            mpks: read_map(buf, &RangeCfg::from(1..=MAX_PARTICIPANTS))?,
        })
    }
}

/// What a dealer publishes about the share it dealt to one recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareOrSign {
    /// The dealt share, revealed because the recipient did not acknowledge it.
    Share(Scalar),
    /// The recipient's acknowledgement of the dealer's commitment.
    Sign(Signature),
}

impl Write for ShareOrSign {
    fn write(&self, buf: &mut impl BufMut) {
        match self {
            ShareOrSign::Share(share) => {
                0u8.write(buf);
                share.write(buf);
            }
            ShareOrSign::Sign(signature) => {
                1u8.write(buf);
                signature.write(buf);
            }
        }
    }
}

impl EncodeSize for ShareOrSign {
    fn encode_size(&self) -> usize {
        1 + match self {
            ShareOrSign::Share(share) => share.encode_size(),
            ShareOrSign::Sign(signature) => signature.encode_size(),
        }
    }
}

impl Read for ShareOrSign {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            0 => Ok(ShareOrSign::Share(Scalar::read(buf)?)),
            1 => Ok(ShareOrSign::Sign(Signature::read(buf)?)),
            tag => Err(CodecError::InvalidEnum("ShareOrSign", tag)),
        }
    }
}

/// A dealer's shares-or-signs, keyed by recipient.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShareOrSigns {
    pub entries: BTreeMap<NodeId, ShareOrSign>,
}

impl Write for ShareOrSigns {
    fn write(&self, buf: &mut impl BufMut) {
        self.entries.write(buf);
    }
}

impl EncodeSize for ShareOrSigns {
    fn encode_size(&self) -> usize {
        self.entries.encode_size()
    }
}

impl Read for ShareOrSigns {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            entries: read_map(buf, &())?,
        })
    }
}

/// Shares-or-signs submitted in a session, keyed by dealer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupSharesOrSigns {
    pub shares: BTreeMap<NodeId, ShareOrSigns>,
}

impl Write for GroupSharesOrSigns {
    fn write(&self, buf: &mut impl BufMut) {
        self.shares.write(buf);
    }
}

impl EncodeSize for GroupSharesOrSigns {
    fn encode_size(&self) -> usize {
        self.shares.encode_size()
    }
}

impl Read for GroupSharesOrSigns {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            shares: read_map(buf, &())?,
        })
    }
}

/// Replicated state of the view change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseNode {
    pub phase: Phase,
    /// Round the current phase was entered at.
    pub start_round: u64,
    /// Round last processed.
    pub current_round: u64,
    /// Consecutive restarts since the last completed epoch.
    pub restarts: u64,
}

impl Write for PhaseNode {
    fn write(&self, buf: &mut impl BufMut) {
        self.phase.write(buf);
        self.start_round.write(buf);
        self.current_round.write(buf);
        self.restarts.write(buf);
    }
}

impl EncodeSize for PhaseNode {
    fn encode_size(&self) -> usize {
        self.phase.encode_size()
            + self.start_round.encode_size()
            + self.current_round.encode_size()
            + self.restarts.encode_size()
    }
}

impl Read for PhaseNode {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            phase: Phase::read(buf)?,
            start_round: u64::read(buf)?,
            current_round: u64::read(buf)?,
            restarts: u64::read(buf)?,
        })
    }
}

/// Membership and thresholds of one epoch, chained to the epoch before it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MagicBlock {
    pub number: u64,
    pub previous_hash: Digest,
    /// Round the epoch starts at.
    pub starting_round: u64,
    pub miners: BTreeMap<NodeId, Member>,
    pub sharders: Pool,
    pub n: u32,
    pub k: u32,
    pub t: u32,
    pub mpks: Mpks,
    pub shares_or_signs: GroupSharesOrSigns,
    /// Digest of every other field.
    pub hash: Digest,
}

impl MagicBlock {
    /// Computes the digest of the block's content (everything but `hash`).
    pub fn digest(&self) -> Digest {
        let mut content = Vec::with_capacity(self.encode_size());
        self.write_content(&mut content);
        let mut hasher = Sha256::new();
        hasher.update(&content);
        hasher.finalize()
    }

    /// Sets `hash` to the digest of the block's content.
    pub fn seal(mut self) -> Self {
        self.hash = self.digest();
        self
    }

    fn write_content(&self, buf: &mut impl BufMut) {
        self.number.write(buf);
        self.previous_hash.write(buf);
        self.starting_round.write(buf);
        self.miners.write(buf);
        self.sharders.write(buf);
        self.n.write(buf);
        self.k.write(buf);
        self.t.write(buf);
        self.mpks.write(buf);
        self.shares_or_signs.write(buf);
    }
}

impl Write for MagicBlock {
    fn write(&self, buf: &mut impl BufMut) {
        self.write_content(buf);
        self.hash.write(buf);
    }
}

impl EncodeSize for MagicBlock {
    fn encode_size(&self) -> usize {
        self.number.encode_size()
            + self.previous_hash.encode_size()
            + self.starting_round.encode_size()
            + self.miners.encode_size()
            + self.sharders.encode_size()
            + self.n.encode_size()
            + self.k.encode_size()
            + self.t.encode_size()
            + self.mpks.encode_size()
            + self.shares_or_signs.encode_size()
            + self.hash.encode_size()
    }
}

impl Read for MagicBlock {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        Ok(Self {
            number: u64::read(buf)?,
            previous_hash: Digest::read(buf)?,
            starting_round: u64::read(buf)?,
            miners: read_map(buf, &())?,
            sharders: Pool::read(buf)?,
            n: u32::read(buf)?,
            k: u32::read(buf)?,
            t: u32::read(buf)?,
            mpks: Mpks::read(buf)?,
            shares_or_signs: GroupSharesOrSigns::read(buf)?,
            hash: Digest::read(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochal_codec::{DecodeExt, Encode};
    use epochal_cryptography::bls12381::{
        dkg::ops::generate_shares,
        primitives::{group::Element, ops::keypair},
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn node(id: &str, seed: u64) -> Node {
        let (_, public_key) = keypair(&mut StdRng::seed_from_u64(seed));
        Node {
            id: id.to_string(),
            public_key,
            host: "127.0.0.1".to_string(),
            port: 7000,
            stake: seed,
        }
    }

    fn block() -> MagicBlock {
        let (commitment, _) = generate_shares(&mut StdRng::seed_from_u64(9), 3, 2);
        let mut sharders = Pool::default();
        sharders.add(node("s", 4));
        let member = Member {
            node: node("m", 3),
            index: 0,
            revealed_shares: 1,
        };
        let mut entries = BTreeMap::new();
        entries.insert("m".to_string(), ShareOrSign::Share(Scalar::from_u64(5)));
        entries.insert("x".to_string(), ShareOrSign::Sign(Signature::one()));
        MagicBlock {
            number: 2,
            starting_round: 100,
            miners: BTreeMap::from([("m".to_string(), member)]),
            sharders,
            n: 3,
            k: 2,
            t: 2,
            mpks: Mpks {
                mpks: BTreeMap::from([("m".to_string(), commitment)]),
            },
            shares_or_signs: GroupSharesOrSigns {
                shares: BTreeMap::from([("m".to_string(), ShareOrSigns { entries })]),
            },
            ..Default::default()
        }
        .seal()
    }

    #[test]
    fn test_magic_block_codec() {
        let block = block();
        let encoded = block.encode();
        assert_eq!(encoded.len(), block.encode_size());
        let decoded = MagicBlock::decode(encoded).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.digest(), block.hash);
    }

    #[test]
    fn test_hash_covers_content() {
        let block = block();
        let mut changed = block.clone();
        changed.starting_round += 1;
        assert_ne!(changed.digest(), block.hash);

        // The stored hash itself is not part of the content
        let mut rehashed = block.clone();
        rehashed.hash = Digest::default();
        assert_eq!(rehashed.digest(), block.hash);
    }

    #[test]
    fn test_empty_records() {
        assert_eq!(DkgSet::decode(DkgSet::default().encode()).unwrap(), DkgSet::default());
        assert_eq!(
            PhaseNode::decode(PhaseNode::default().encode()).unwrap(),
            PhaseNode::default()
        );
        assert_eq!(Mpks::decode(Mpks::default().encode()).unwrap(), Mpks::default());
    }

    #[test]
    fn test_rejects_empty_id() {
        let mut pool = Pool::default();
        pool.add(Node {
            id: String::new(),
            ..node("a", 1)
        });
        assert!(Pool::decode(pool.encode()).is_err());
    }

    #[test]
    fn test_ack_payload_binds_dealer() {
        let (commitment, _) = generate_shares(&mut StdRng::seed_from_u64(1), 3, 2);
        assert_ne!(
            ack_payload(&"a".to_string(), &commitment),
            ack_payload(&"b".to_string(), &commitment)
        );
    }
}
