//! Records started rounds and serves a configurable finalized round.

use crate::{Advancer, Finalized};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::mpsc;

/// An [Advancer] and [Finalized] that records every started round.
#[derive(Clone, Default)]
pub struct Recorder {
    started: Arc<Mutex<Vec<(u64, u64)>>>,
    finalized: Arc<AtomicU64>,
    notify: Option<mpsc::UnboundedSender<(u64, u64)>>,
}

impl Recorder {
    /// Creates a recorder with the finalized round at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder that also forwards every started `(round, seed)`.
    pub fn with_notify() -> (Self, mpsc::UnboundedReceiver<(u64, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                notify: Some(tx),
                ..Self::default()
            },
            rx,
        )
    }

    /// Returns every `(round, seed)` started so far, in the order they were started.
    pub fn started(&self) -> Vec<(u64, u64)> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the latest finalized round.
    pub fn finalize(&self, round: u64) {
        self.finalized.store(round, Ordering::Relaxed);
    }
}

impl Advancer for Recorder {
    fn start_round(&self, round: u64, seed: u64) {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((round, seed));
        if let Some(notify) = &self.notify {
            let _ = notify.send((round, seed));
        }
    }
}

impl Finalized for Recorder {
    fn latest_finalized(&self) -> u64 {
        self.finalized.load(Ordering::Relaxed)
    }
}
