//! An in-memory [State].

use crate::{State, StoreError};
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

/// A [State] backed by a map, with optional write failures.
#[derive(Clone, Default)]
pub struct Memory {
    values: Arc<Mutex<BTreeMap<String, Bytes>>>,
    fail_writes: Arc<AtomicBool>,
}

impl Memory {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Returns the keys written so far.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State for Memory {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable(key.to_string()));
        }
        self.lock().insert(key.to_string(), value);
        Ok(())
    }
}
