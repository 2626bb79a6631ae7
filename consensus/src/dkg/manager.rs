use super::{Config, Error, Output, Store};
use crate::{
    wire::{DkgShare, Message},
    Roster, Sender,
};
use bytes::Bytes;
use epochal_codec::Encode;
use epochal_cryptography::bls12381::{
    dkg::ops::{check_threshold, construct_public, construct_share, verify_share},
    primitives::{group::Share, poly},
};
use futures::Future;
use rand::{CryptoRng, RngCore};
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Mutable state of a session.
struct Inner {
    shares: Store,
    commitments: BTreeMap<u32, poly::Public>,
    output: Option<Output>,
}

/// Drives one DKG session for the local node.
///
/// `receive` may be called concurrently with `broadcast` (and with any number of waiters).
pub struct Manager<R: Roster> {
    config: Config<R>,
    me: u32,

    commitment: poly::Public,
    dealt: BTreeMap<u32, Share>,

    inner: RwLock<Inner>,
    done: watch::Sender<bool>,
}

impl<R: Roster> Manager<R> {
    /// Starts a session: samples this node's polynomial, deals a share to every participant
    /// and records the share dealt to itself.
    pub fn new<G: RngCore + CryptoRng>(config: Config<R>, rng: &mut G) -> Result<Self, Error> {
        let me = config
            .roster
            .index(&config.me)
            .ok_or_else(|| Error::NotParticipant(config.me.clone()))?;
        let n = config.roster.participants().len() as u32;
        check_threshold(n, config.threshold).map_err(Error::InvalidThreshold)?;

        // Deal to every participant at its (possibly sparse) index
        let secret = poly::new_from(config.threshold - 1, rng);
        let commitment = poly::Public::commit(&secret);
        let dealt = config
            .roster
            .participants()
            .iter()
            .map(|participant| {
                let eval = secret.evaluate(participant.index);
                (
                    participant.index,
                    Share {
                        index: eval.index,
                        private: eval.value,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        // Record our own share
        let mut shares = Store::new(n);
        let mut commitments = BTreeMap::new();
        if let Some(own) = dealt.get(&me) {
            shares.insert(me, *own);
            commitments.insert(me, commitment.clone());
        }
        let (done, _) = watch::channel(false);
        let manager = Self {
            me,
            commitment,
            dealt,
            inner: RwLock::new(Inner {
                shares,
                commitments,
                output: None,
            }),
            done,
            config,
        };
        info!(
            session = manager.config.session,
            me = manager.me,
            n,
            threshold = manager.config.threshold,
            "started dkg session"
        );

        // A single participant is complete immediately
        manager.finalize(&mut manager.inner.write().unwrap_or_else(PoisonError::into_inner));
        Ok(manager)
    }

    /// Returns the session number.
    pub fn session(&self) -> u64 {
        self.config.session
    }

    /// Returns this node's index.
    pub fn index(&self) -> u32 {
        self.me
    }

    /// Returns the commitment to this node's polynomial.
    pub fn commitment(&self) -> &poly::Public {
        &self.commitment
    }

    /// Returns the number of distinct dealers whose share was accepted (including this node).
    pub fn received(&self) -> u32 {
        self.read().shares.len()
    }

    /// Records the share dealt to this node by `dealer`.
    ///
    /// Returns `Ok(true)` if the share was accepted and `Ok(false)` if `dealer` was already
    /// recorded (in which case the share is ignored without being verified). A share is only
    /// accepted if it matches the dealer's commitment.
    pub fn receive(
        &self,
        dealer: u32,
        commitment: poly::Public,
        share: Share,
    ) -> Result<bool, Error> {
        if !self
            .config
            .roster
            .participants()
            .iter()
            .any(|participant| participant.index == dealer)
        {
            return Err(Error::UnknownDealer(dealer));
        }
        if self.read().shares.contains(dealer) {
            debug!(dealer, "ignoring duplicate share");
            return Ok(false);
        }

        // Verify outside of the lock
        verify_share(&commitment, self.config.threshold, self.me, &share)
            .map_err(|err| Error::InvalidShare(dealer, err))?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.shares.insert(dealer, share) {
            return Ok(false);
        }
        inner.commitments.insert(dealer, commitment);
        debug!(
            dealer,
            received = inner.shares.len(),
            expected = inner.shares.expected(),
            "accepted share"
        );
        self.finalize(&mut inner);
        Ok(true)
    }

    /// Returns true once a share from every participant has been accepted.
    pub fn is_complete(&self) -> bool {
        self.read().shares.is_complete()
    }

    /// Returns the session output.
    ///
    /// The output is computed exactly once (when the last share is accepted). Calling this
    /// before completion returns [Error::Incomplete].
    pub fn aggregate(&self) -> Result<Output, Error> {
        let inner = self.read();
        match &inner.output {
            Some(output) => Ok(output.clone()),
            None => Err(Error::Incomplete {
                received: inner.shares.len(),
                expected: inner.shares.expected(),
            }),
        }
    }

    /// Waits until the session completes and returns its output.
    ///
    /// There is no timeout: if some participant never delivers its share, this never
    /// returns.
    pub async fn wait_until_complete(&self) -> Result<Output, Error> {
        let mut done = self.done.subscribe();
        done.wait_for(|complete| *complete)
            .await
            .map_err(|_| Error::Cancelled)?;
        self.aggregate()
    }

    /// Waits until either the session completes or `cancel` resolves.
    pub async fn wait_or_cancel(&self, cancel: impl Future<Output = ()>) -> Result<Output, Error> {
        tokio::select! {
            biased;

            output = self.wait_until_complete() => output,
            _ = cancel => {
                warn!(
                    session = self.config.session,
                    received = self.received(),
                    "dkg wait cancelled"
                );
                Err(Error::Cancelled)
            },
        }
    }

    /// Sends every other participant the share dealt to it (in random order).
    ///
    /// Failed sends are logged and retried on the next pass. Returns the number of shares
    /// handed to `sender`.
    pub async fn broadcast<S: Sender>(&self, sender: &mut S) -> usize {
        let mut sent = 0;
        for participant in self.config.roster.shuffled() {
            if participant.index == self.me {
                continue;
            }
            let Some(share) = self.dealt.get(&participant.index) else {
                continue;
            };
            let payload = Bytes::from(
                Message::Dkg(DkgShare {
                    session: self.config.session,
                    commitment: self.commitment.clone(),
                    share: *share,
                })
                .encode(),
            );
            match sender.send(&participant.id, payload).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(?err, recipient = %participant.id, "failed to send share");
                }
            }
        }
        sent
    }

    /// Rebroadcasts this node's shares every `rebroadcast` interval until the session
    /// completes, then performs one final pass (for peers that may still be missing our
    /// share) and returns.
    pub async fn run<S: Sender>(self: Arc<Self>, mut sender: S) {
        let mut ticker = tokio::time::interval(self.config.rebroadcast);
        loop {
            ticker.tick().await;
            let complete = self.is_complete();
            let sent = self.broadcast(&mut sender).await;
            debug!(session = self.config.session, sent, complete, "broadcast shares");
            if complete {
                break;
            }
        }
        info!(session = self.config.session, "stopped broadcasting shares");
    }

    /// Computes the output if every share has been accepted (and it was not computed yet).
    fn finalize(&self, inner: &mut Inner) {
        if inner.output.is_some() || !inner.shares.is_complete() {
            return;
        }
        let public = match construct_public(inner.commitments.values(), inner.shares.expected())
        {
            Ok(public) => public,
            Err(err) => {
                warn!(?err, "failed to construct group public polynomial");
                return;
            }
        };
        let share = construct_share(self.me, inner.shares.shares());
        info!(
            session = self.config.session,
            public = ?poly::public(&public),
            "dkg complete"
        );
        inner.output = Some(Output { public, share });
        self.done.send_replace(true);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::network::Network,
        roster::Participants,
        wire::{DkgShare, Message},
        NodeId,
    };
    use epochal_codec::DecodeExt;
    use epochal_cryptography::bls12381::{
        dkg::Error as DkgError,
        primitives::ops::{partial_sign_message, threshold_signature_recover, verify_message},
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(|i| format!("node-{i}")).collect()
    }

    fn config(me: &str, roster: &Participants, threshold: u32) -> Config<Participants> {
        Config {
            me: me.to_string(),
            session: 1,
            roster: roster.clone(),
            threshold,
            rebroadcast: Duration::from_millis(10),
        }
    }

    fn managers(n: usize, threshold: u32, seed: u64) -> Vec<Manager<Participants>> {
        let roster = Participants::new(ids(n));
        let mut rng = StdRng::seed_from_u64(seed);
        ids(n)
            .iter()
            .map(|id| Manager::new(config(id, &roster, threshold), &mut rng).unwrap())
            .collect()
    }

    fn deliver(from: &Manager<Participants>, to: &Manager<Participants>) -> Result<bool, Error> {
        to.receive(
            from.index(),
            from.commitment().clone(),
            from.dealt[&to.index()],
        )
    }

    #[test]
    fn test_completes_only_with_every_share() {
        // In order, reversed, and interleaved
        for order in [[1, 2, 3], [3, 2, 1], [2, 3, 1]] {
            let managers = managers(4, 3, 0);
            let target = &managers[0];
            assert_eq!(target.received(), 1);
            for (delivered, dealer) in order.into_iter().enumerate() {
                assert!(!target.is_complete());
                assert!(matches!(
                    target.aggregate(),
                    Err(Error::Incomplete { expected: 4, .. })
                ));
                assert!(deliver(&managers[dealer], target).unwrap());
                assert_eq!(target.received(), delivered as u32 + 2);
            }
            assert!(target.is_complete());
            target.aggregate().unwrap();
        }
    }

    #[test]
    fn test_duplicate_share_ignored() {
        let managers = managers(3, 2, 1);
        assert!(deliver(&managers[1], &managers[0]).unwrap());
        assert!(!deliver(&managers[1], &managers[0]).unwrap());
        assert_eq!(managers[0].received(), 2);

        // Own share is never accepted twice either
        assert!(!deliver(&managers[0], &managers[0]).unwrap());
    }

    #[test]
    fn test_invalid_share_rejected() {
        let managers = managers(3, 2, 2);

        // Share addressed to another participant
        let err = managers[0]
            .receive(
                1,
                managers[1].commitment().clone(),
                managers[1].dealt[&2],
            )
            .unwrap_err();
        assert_eq!(err, Error::InvalidShare(1, DkgError::MisdirectedShare));

        // Share not matching the commitment
        let err = managers[0]
            .receive(
                1,
                managers[2].commitment().clone(),
                managers[1].dealt[&0],
            )
            .unwrap_err();
        assert_eq!(err, Error::InvalidShare(1, DkgError::ShareWrongCommitment));

        // Rejected shares are not recorded
        assert_eq!(managers[0].received(), 1);
        assert!(deliver(&managers[1], &managers[0]).unwrap());

        // Unknown dealer
        assert_eq!(
            managers[0]
                .receive(9, managers[1].commitment().clone(), managers[1].dealt[&0])
                .unwrap_err(),
            Error::UnknownDealer(9)
        );
    }

    #[test]
    fn test_not_participant() {
        let roster = Participants::new(ids(3));
        let result = Manager::new(config("stranger", &roster, 2), &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(Error::NotParticipant(_))));

        let result = Manager::new(config("node-0", &roster, 4), &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(Error::InvalidThreshold(_))));
    }

    #[test]
    fn test_aggregate_independent_of_order() {
        // Two copies of the same node (same dealing) receive shares in different orders
        let (n, threshold) = (5, 3);
        let roster = Participants::new(ids(n));
        let others = managers(n, threshold, 3);
        let first =
            Manager::new(config("node-0", &roster, threshold), &mut StdRng::seed_from_u64(9))
                .unwrap();
        let second =
            Manager::new(config("node-0", &roster, threshold), &mut StdRng::seed_from_u64(9))
                .unwrap();
        for dealer in &others[1..] {
            deliver(dealer, &first).unwrap();
        }
        for dealer in others[1..].iter().rev() {
            deliver(dealer, &second).unwrap();
        }
        assert_eq!(first.aggregate().unwrap(), second.aggregate().unwrap());
    }

    #[test]
    fn test_group_key_signs() {
        let (n, threshold) = (4, 3);
        let managers = managers(n, threshold, 4);
        for to in &managers {
            for from in &managers {
                if from.index() != to.index() {
                    deliver(from, to).unwrap();
                }
            }
        }
        let outputs = managers
            .iter()
            .map(|m| m.aggregate().unwrap())
            .collect::<Vec<_>>();
        for output in &outputs {
            assert_eq!(output.public, outputs[0].public);
        }

        // Any `threshold` group shares recover a signature under the group key
        let partials = outputs[1..]
            .iter()
            .map(|o| partial_sign_message(&o.share, None, b"round"))
            .collect::<Vec<_>>();
        let signature = threshold_signature_recover(threshold, &partials).unwrap();
        verify_message(poly::public(&outputs[0].public), None, b"round", &signature).unwrap();
    }

    #[test]
    fn test_single_participant() {
        let managers = managers(1, 1, 5);
        assert!(managers[0].is_complete());
        managers[0].aggregate().unwrap();
    }

    #[tokio::test]
    async fn test_wait_or_cancel() {
        let managers = managers(3, 2, 6);
        let result = managers[0].wait_or_cancel(async {}).await;
        assert_eq!(result, Err(Error::Cancelled));

        deliver(&managers[1], &managers[0]).unwrap();
        deliver(&managers[2], &managers[0]).unwrap();
        let output = managers[0]
            .wait_or_cancel(futures::future::pending())
            .await
            .unwrap();
        assert_eq!(output, managers[0].aggregate().unwrap());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let managers = Arc::new(managers(2, 2, 7));
        let waiter = {
            let managers = managers.clone();
            tokio::spawn(async move { managers[0].wait_until_complete().await })
        };
        tokio::task::yield_now().await;
        deliver(&managers[1], &managers[0]).unwrap();
        let output = waiter.await.unwrap().unwrap();
        assert_eq!(output.share.index, 0);
    }

    #[tokio::test]
    async fn test_run_over_network() {
        let (n, threshold) = (4, 3);
        let network = Network::new();
        let managers = managers(n, threshold, 8)
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();
        let roster = Participants::new(ids(n));

        // Drop the first link from node-1 to node-2 (rebroadcast recovers it)
        network.block_once("node-1", "node-2");

        let mut handles = Vec::new();
        for manager in &managers {
            let id = format!("node-{}", manager.index());
            let (link, mut inbox) = network.register(&id);
            handles.push(tokio::spawn(manager.clone().run(link)));

            let manager = manager.clone();
            let roster = roster.clone();
            tokio::spawn(async move {
                while let Some((from, payload)) = inbox.recv().await {
                    let Ok(Message::Dkg(DkgShare {
                        commitment, share, ..
                    })) = Message::decode(payload)
                    else {
                        continue;
                    };
                    let dealer = roster.index(&from).unwrap();
                    let _ = manager.receive(dealer, commitment, share);
                }
            });
        }
        for manager in &managers {
            tokio::time::timeout(Duration::from_secs(5), manager.wait_until_complete())
                .await
                .unwrap()
                .unwrap();
        }

        // Rebroadcast loops stop after their final pass
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
        let public = managers[0].aggregate().unwrap().public;
        for manager in &managers {
            assert_eq!(manager.aggregate().unwrap().public, public);
        }
    }
}
