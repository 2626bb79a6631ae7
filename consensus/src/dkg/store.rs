use epochal_cryptography::bls12381::primitives::group::Share;
use std::collections::BTreeMap;

/// Shares received during a DKG session, keyed by the index of their dealer.
///
/// At most one share is kept per dealer: the first one inserted.
#[derive(Clone, Debug)]
pub struct Store {
    expected: u32,
    shares: BTreeMap<u32, Share>,
}

impl Store {
    /// Creates an empty store that completes after `expected` distinct dealers.
    pub fn new(expected: u32) -> Self {
        Self {
            expected,
            shares: BTreeMap::new(),
        }
    }

    /// Records `share` from `dealer`.
    ///
    /// Returns false (and leaves the store untouched) if `dealer` already has a share.
    pub fn insert(&mut self, dealer: u32, share: Share) -> bool {
        if self.shares.contains_key(&dealer) {
            return false;
        }
        self.shares.insert(dealer, share);
        true
    }

    /// Returns true if `dealer` already has a share.
    pub fn contains(&self, dealer: u32) -> bool {
        self.shares.contains_key(&dealer)
    }

    /// Returns the share received from `dealer`.
    pub fn get(&self, dealer: u32) -> Option<&Share> {
        self.shares.get(&dealer)
    }

    /// Returns the number of dealers with a share.
    pub fn len(&self) -> u32 {
        self.shares.len() as u32
    }

    /// Returns true if no share has been received.
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Returns the number of distinct dealers required.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Returns true once every expected dealer has a share.
    pub fn is_complete(&self) -> bool {
        self.len() >= self.expected
    }

    /// Iterates over received shares in dealer order.
    pub fn shares(&self) -> impl Iterator<Item = &Share> {
        self.shares.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epochal_cryptography::bls12381::primitives::group::{Element, Scalar};

    fn share(value: u64) -> Share {
        Share {
            index: 0,
            private: Scalar::from_u64(value),
        }
    }

    #[test]
    fn test_duplicates_ignored() {
        let mut store = Store::new(3);
        assert!(store.insert(1, share(10)));
        assert!(!store.insert(1, share(20)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1), Some(&share(10)));
    }

    #[test]
    fn test_complete_requires_all() {
        let mut store = Store::new(3);
        assert!(store.is_empty());
        store.insert(0, share(1));
        store.insert(2, share(2));
        assert!(!store.is_complete());
        store.insert(1, share(3));
        assert!(store.is_complete());
        assert_eq!(store.expected(), 3);
        assert_eq!(store.shares().count(), 3);
        assert!(store.contains(1));
    }

    #[test]
    fn test_zero_share_is_kept() {
        let mut store = Store::new(1);
        assert!(store.insert(0, Share { index: 0, private: Scalar::zero() }));
        assert!(store.is_complete());
    }
}
