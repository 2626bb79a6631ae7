//! Records view-change phase transitions.

use crate::{viewchange::Phase, Reporter};
use std::sync::{Arc, Mutex, PoisonError};

/// A [Reporter] that records every `(phase, round)` it observes.
#[derive(Clone, Default)]
pub struct Phases {
    observed: Arc<Mutex<Vec<(Phase, u64)>>>,
}

impl Phases {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every observed `(phase, round)`.
    pub fn observed(&self) -> Vec<(Phase, u64)> {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Reporter for Phases {
    fn phase(&self, phase: Phase, round: u64) {
        self.observed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((phase, round));
    }
}
