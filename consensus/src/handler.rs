//! Validate inbound peer messages and route them to the active DKG session or beacon driver.

use crate::{
    beacon::{self, Driver, Outcome},
    dkg::{self, Manager},
    wire::{DkgShare, Message},
    Advancer, Finalized, NodeId, Roster,
};
use bytes::Bytes;
use epochal_codec::{DecodeExt, Error as CodecError};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

/// Errors returned to the sender of a rejected message.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown sender: {0}")]
    UnknownSender(NodeId),
    #[error("malformed message: {0}")]
    Malformed(CodecError),
    #[error("no active dkg session")]
    NoSession,
    #[error("wrong session: expected {expected}, got {got}")]
    WrongSession { expected: u64, got: u64 },
    #[error("no active beacon")]
    NoDriver,
    #[error("dkg: {0}")]
    Dkg(dkg::Error),
    #[error("beacon: {0}")]
    Beacon(beacon::Error),
}

/// What happened to an accepted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A DKG share was processed (`accepted` is false for duplicates).
    Dkg { accepted: bool },
    /// A VRF share was processed.
    Vrf(Outcome),
    /// The message belonged to an earlier session and was dropped.
    Stale,
}

/// Routes messages from the participants of the current epoch.
pub struct Handler<R: Roster, A: Advancer, F: Finalized> {
    roster: RwLock<R>,
    session: RwLock<Option<Arc<Manager<R>>>>,
    driver: RwLock<Option<Arc<Driver<A, F>>>>,
}

impl<R: Roster, A: Advancer, F: Finalized> Handler<R, A, F> {
    /// Creates a handler accepting messages from `roster` (with nothing to route them to yet).
    pub fn new(roster: R) -> Self {
        Self {
            roster: RwLock::new(roster),
            session: RwLock::new(None),
            driver: RwLock::new(None),
        }
    }

    /// Replaces the participants messages are accepted from.
    pub fn set_roster(&self, roster: R) {
        *self.roster.write().unwrap_or_else(PoisonError::into_inner) = roster;
    }

    /// Routes DKG shares to `session`.
    pub fn set_session(&self, session: Arc<Manager<R>>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Routes VRF shares to `driver`.
    pub fn set_driver(&self, driver: Arc<Driver<A, F>>) {
        *self.driver.write().unwrap_or_else(PoisonError::into_inner) = Some(driver);
    }

    /// Validates `payload` from `sender` and delivers it.
    pub fn handle(&self, sender: &NodeId, payload: Bytes) -> Result<Delivery, Error> {
        let message = Message::decode(payload).map_err(Error::Malformed)?;
        let index = self
            .roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index(sender)
            .ok_or_else(|| Error::UnknownSender(sender.clone()))?;
        match message {
            Message::Dkg(DkgShare {
                session,
                commitment,
                share,
            }) => {
                let manager = self
                    .session
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .ok_or(Error::NoSession)?;
                let expected = manager.session();
                if session < expected {
                    debug!(%sender, session, expected, "dropping share from earlier session");
                    return Ok(Delivery::Stale);
                }
                if session != expected {
                    return Err(Error::WrongSession {
                        expected,
                        got: session,
                    });
                }
                let accepted = manager
                    .receive(index, commitment, share)
                    .map_err(Error::Dkg)?;
                Ok(Delivery::Dkg { accepted })
            }
            Message::Vrf(vrf) => {
                let driver = self
                    .driver
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .ok_or(Error::NoDriver)?;
                let outcome = driver.add_share(index, vrf).map_err(Error::Beacon)?;
                Ok(Delivery::Vrf(outcome))
            }
        }
    }
}
