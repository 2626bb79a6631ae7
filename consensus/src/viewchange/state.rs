//! Buffered access to replicated state.

use super::Error;
use crate::State;
use bytes::Bytes;
use epochal_codec::{DecodeExt, Encode, Read};
use std::collections::BTreeMap;

/// Writes buffered on top of a [State] until committed.
///
/// Reads observe buffered writes. Nothing reaches the underlying state before
/// [Batch::commit].
pub(super) struct Batch<'a, S: State> {
    state: &'a S,
    writes: BTreeMap<&'static str, Bytes>,
}

impl<'a, S: State> Batch<'a, S> {
    pub(super) fn new(state: &'a S) -> Self {
        Self {
            state,
            writes: BTreeMap::new(),
        }
    }

    /// Returns the record at `key` (or `None` if it was never written).
    pub(super) fn get_optional<T: Read<Cfg = ()>>(
        &self,
        key: &'static str,
    ) -> Result<Option<T>, Error> {
        let value = match self.writes.get(key) {
            Some(value) => Some(value.clone()),
            None => self.state.get(key)?,
        };
        value
            .map(|value| T::decode(value).map_err(|source| Error::Decode { key, source }))
            .transpose()
    }

    /// Returns the record at `key` (or its empty value if it was never written).
    pub(super) fn get<T: Read<Cfg = ()> + Default>(&self, key: &'static str) -> Result<T, Error> {
        Ok(self.get_optional(key)?.unwrap_or_default())
    }

    pub(super) fn put<T: Encode>(&mut self, key: &'static str, value: &T) {
        self.writes.insert(key, value.encode().freeze());
    }

    /// Returns the buffered writes (to restore with [Batch::rollback]).
    pub(super) fn checkpoint(&self) -> BTreeMap<&'static str, Bytes> {
        self.writes.clone()
    }

    pub(super) fn rollback(&mut self, checkpoint: BTreeMap<&'static str, Bytes>) {
        self.writes = checkpoint;
    }

    /// Writes every buffered record to the underlying state.
    pub(super) fn commit(self) -> Result<(), Error> {
        for (key, value) in self.writes {
            self.state.put(key, value)?;
        }
        Ok(())
    }
}
