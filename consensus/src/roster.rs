//! A fixed set of participants.

use crate::{NodeId, Participant, Roster};
use std::{collections::BTreeMap, sync::Arc};

/// An immutable, cheaply cloneable [Roster].
#[derive(Clone, Debug, Default)]
pub struct Participants {
    list: Arc<Vec<Participant>>,
    indices: Arc<BTreeMap<NodeId, u32>>,
}

impl Participants {
    /// Assigns indices to `ids` in ascending id order (duplicates are ignored).
    pub fn new(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut ids = ids.into_iter().collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        Self::from_indexed(
            ids.into_iter()
                .enumerate()
                .map(|(index, id)| (id, index as u32)),
        )
    }

    /// Uses the provided `(id, index)` assignment.
    ///
    /// Indices need not be contiguous (participants may have been pruned from the set
    /// they were assigned in).
    pub fn from_indexed(assigned: impl IntoIterator<Item = (NodeId, u32)>) -> Self {
        let indices = assigned.into_iter().collect::<BTreeMap<_, _>>();
        let mut list = indices
            .iter()
            .map(|(id, index)| Participant {
                index: *index,
                id: id.clone(),
            })
            .collect::<Vec<_>>();
        list.sort();
        Self {
            list: Arc::new(list),
            indices: Arc::new(indices),
        }
    }

    /// Returns the number of participants.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if there are no participants.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Roster for Participants {
    fn participants(&self) -> &[Participant] {
        &self.list
    }

    fn index(&self, id: &NodeId) -> Option<u32> {
        self.indices.get(id).copied()
    }
}
