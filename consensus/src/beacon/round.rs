use super::Beacon;
use epochal_cryptography::bls12381::primitives::{group::Signature, poly::PartialSignature};
use std::collections::BTreeMap;

/// Shares recorded for a single round (and its beacon, once derived).
///
/// Shares that arrive once the round already has enough are kept in reserve (at most
/// as many as are recorded) and recorded if an invalid share is evicted.
#[derive(Default)]
pub(super) struct Round {
    shares: BTreeMap<u32, Option<Signature>>,
    reserve: BTreeMap<u32, Option<Signature>>,
    beacon: Option<Beacon>,
}

impl Round {
    /// Returns a round whose beacon is already known.
    pub(super) fn computed(beacon: Beacon) -> Self {
        Self {
            shares: BTreeMap::new(),
            reserve: BTreeMap::new(),
            beacon: Some(beacon),
        }
    }

    pub(super) fn len(&self) -> u32 {
        self.shares.len() as u32
    }

    /// Returns true if `sender` has a recorded or reserved share.
    pub(super) fn contains(&self, sender: u32) -> bool {
        self.shares.contains_key(&sender) || self.reserve.contains_key(&sender)
    }

    /// Records the share of `sender` (returning false if it already has one).
    pub(super) fn insert(&mut self, sender: u32, signature: Option<Signature>) -> bool {
        if self.contains(sender) {
            return false;
        }
        self.shares.insert(sender, signature);
        true
    }

    /// Holds the share of `sender` in reserve (returning false if it already has one or
    /// the reserve is full).
    pub(super) fn reserve(&mut self, sender: u32, signature: Option<Signature>) -> bool {
        if self.contains(sender) || self.reserve.len() >= self.shares.len() {
            return false;
        }
        self.reserve.insert(sender, signature);
        true
    }

    pub(super) fn reserved(&self) -> u32 {
        self.reserve.len() as u32
    }

    /// Drops the recorded share of `sender` and records reserved shares (in sender
    /// order) until `threshold` are recorded again. Returns how many were moved.
    pub(super) fn evict(&mut self, sender: u32, threshold: u32) -> u32 {
        self.shares.remove(&sender);
        let mut moved = 0;
        while self.len() < threshold {
            let Some((sender, signature)) = self.reserve.pop_first() else {
                break;
            };
            self.shares.insert(sender, signature);
            moved += 1;
        }
        moved
    }

    /// Returns recorded partial signatures in sender order.
    pub(super) fn partials(&self) -> Vec<PartialSignature> {
        self.shares
            .iter()
            .filter_map(|(index, signature)| {
                signature.map(|value| PartialSignature {
                    index: *index,
                    value,
                })
            })
            .collect()
    }

    pub(super) fn beacon(&self) -> Option<Beacon> {
        self.beacon
    }

    /// Sets the beacon unless one was already set.
    pub(super) fn set_beacon(&mut self, beacon: Beacon) -> bool {
        if self.beacon.is_some() {
            return false;
        }
        self.beacon = Some(beacon);
        true
    }
}
