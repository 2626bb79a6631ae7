//! An in-memory network of unbounded inboxes.

use crate::NodeId;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Payloads delivered to a node, tagged with their sender.
pub type Inbox = mpsc::UnboundedReceiver<(NodeId, Bytes)>;

/// Errors returned by a [Link].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("recipient unreachable: {0}")]
    Unreachable(NodeId),
    #[error("link blocked: {0} -> {1}")]
    Blocked(NodeId, NodeId),
}

#[derive(Default)]
struct Inner {
    inboxes: BTreeMap<NodeId, mpsc::UnboundedSender<(NodeId, Bytes)>>,
    blocked: BTreeSet<(NodeId, NodeId)>,
    once: BTreeSet<(NodeId, NodeId)>,
    sent: u64,
}

/// A network connecting every registered node to every other.
#[derive(Clone, Default)]
pub struct Network {
    inner: Arc<Mutex<Inner>>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`, returning its outbound link and its inbox.
    ///
    /// Registering an id again replaces its inbox.
    pub fn register(&self, id: &str) -> (Link, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().inboxes.insert(id.to_string(), tx);
        (
            Link {
                me: id.to_string(),
                network: self.clone(),
            },
            rx,
        )
    }

    /// Drops every payload from `from` to `to` until [Network::unblock] is called.
    pub fn block(&self, from: &str, to: &str) {
        self.lock()
            .blocked
            .insert((from.to_string(), to.to_string()));
    }

    /// Drops the next payload from `from` to `to`.
    pub fn block_once(&self, from: &str, to: &str) {
        self.lock().once.insert((from.to_string(), to.to_string()));
    }

    /// Restores the link from `from` to `to`.
    pub fn unblock(&self, from: &str, to: &str) {
        let mut inner = self.lock();
        let link = (from.to_string(), to.to_string());
        inner.blocked.remove(&link);
        inner.once.remove(&link);
    }

    /// Returns the number of payloads delivered so far.
    pub fn delivered(&self) -> u64 {
        self.lock().sent
    }

    fn deliver(&self, from: &NodeId, to: &NodeId, payload: Bytes) -> Result<(), Error> {
        let mut inner = self.lock();
        let link = (from.clone(), to.clone());
        if inner.blocked.contains(&link) || inner.once.remove(&link) {
            return Err(Error::Blocked(from.clone(), to.clone()));
        }
        let inbox = inner
            .inboxes
            .get(to)
            .ok_or_else(|| Error::Unreachable(to.clone()))?;
        inbox
            .send((from.clone(), payload))
            .map_err(|_| Error::Unreachable(to.clone()))?;
        inner.sent += 1;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A node's outbound connection to a [Network].
#[derive(Clone)]
pub struct Link {
    me: NodeId,
    network: Network,
}

impl crate::Sender for Link {
    type Error = Error;

    async fn send(&mut self, recipient: &NodeId, payload: Bytes) -> Result<(), Error> {
        self.network.deliver(&self.me, recipient, payload)
    }
}
