use super::{round::Round, Beacon, Config, Error, Mode};
use crate::{wire::VrfShare, Advancer, Finalized};
use epochal_cryptography::bls12381::primitives::poly::PartialSignature;
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
    time::Instant,
};
use tracing::{debug, info, warn};

/// Result of recording a share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The round is older than the latest finalized round, too far ahead of it, or its
    /// beacon is known.
    Stale,
    /// The sender already has a share recorded for the round.
    Duplicate,
    /// The round already has enough shares (the share is only kept in reserve).
    Dropped,
    /// The share was recorded (the round is still collecting).
    Recorded,
    /// The round has enough shares but the previous round's beacon is not known yet.
    Held,
    /// The share completed the round.
    Completed(Beacon),
}

/// Collects VRF shares per round and derives each round's beacon exactly once.
pub struct Driver<A: Advancer, F: Finalized> {
    config: Config<A, F>,
    rounds: RwLock<BTreeMap<u64, Arc<RwLock<Round>>>>,
}

impl<A: Advancer, F: Finalized> Driver<A, F> {
    /// Creates a driver whose only known beacon is genesis.
    pub fn new(config: Config<A, F>) -> Result<Self, Error> {
        if config.threshold == 0 {
            return Err(Error::InvalidThreshold(0));
        }
        if let Mode::Threshold(signer) = &config.mode {
            if signer.threshold() != config.threshold {
                return Err(Error::InvalidThreshold(config.threshold));
            }
        }
        let genesis = Beacon::genesis(config.genesis_seed);
        let rounds = BTreeMap::from([(0, Arc::new(RwLock::new(Round::computed(genesis))))]);
        Ok(Self {
            config,
            rounds: RwLock::new(rounds),
        })
    }

    /// Returns the index this node records its own shares under.
    pub fn index(&self) -> u32 {
        match &self.config.mode {
            Mode::Threshold(signer) => signer.index(),
            Mode::Development => self.config.me,
        }
    }

    /// Returns the beacon of `round` (if derived and not pruned).
    pub fn beacon(&self, round: u64) -> Option<Beacon> {
        let record = self.record(round)?;
        let beacon = record.read().unwrap_or_else(PoisonError::into_inner).beacon();
        beacon
    }

    /// Returns the number of shares recorded for `round`.
    pub fn recorded(&self, round: u64) -> u32 {
        let Some(record) = self.record(round) else {
            return 0;
        };
        let recorded = record.read().unwrap_or_else(PoisonError::into_inner).len();
        recorded
    }

    /// Records the share `sender` contributed to `share.round`.
    ///
    /// Once the round has `K` shares (and the previous round's beacon is known), the
    /// round's beacon is derived, the round is started, and any following round already
    /// holding `K` shares is completed in turn.
    ///
    /// If the previous round's beacon is known, the share is verified before it is
    /// recorded. Otherwise it is recorded as is and verified when the round completes.
    pub fn add_share(&self, sender: u32, share: VrfShare) -> Result<Outcome, Error> {
        let round = share.round;
        let finalized = self.config.finalized.latest_finalized();
        if round == 0
            || round < finalized
            || round > finalized.saturating_add(self.config.max_ahead)
        {
            return Ok(Outcome::Stale);
        }
        let signature = match &self.config.mode {
            Mode::Threshold(signer) => {
                let signature = share.signature.ok_or(Error::MissingSignature)?;
                if let Some(previous) = self.beacon(round - 1) {
                    let partial = PartialSignature {
                        index: sender,
                        value: signature,
                    };
                    signer.verify_share(round, &previous.output, &partial)?;
                }
                Some(signature)
            }
            Mode::Development => None,
        };

        let record = self.record_or_insert(round);
        let rejected = reject(&record.read().unwrap_or_else(PoisonError::into_inner), sender);
        if let Some(outcome) = rejected {
            return Ok(outcome);
        }
        {
            let mut record = record.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(outcome) = reject(&record, sender) {
                return Ok(outcome);
            }
            if record.len() >= self.config.threshold {
                if record.reserve(sender, signature) {
                    debug!(round, sender, reserved = record.reserved(), "reserved share");
                }
                return Ok(Outcome::Dropped);
            }
            record.insert(sender, signature);
            debug!(round, sender, recorded = record.len(), "recorded share");
            if record.len() < self.config.threshold {
                return Ok(Outcome::Recorded);
            }
        }
        self.complete(round)
    }

    /// Produces this node's share for `round` and records it.
    ///
    /// The share is returned so it can be sent to peers.
    pub fn partial(&self, round: u64) -> Result<VrfShare, Error> {
        let previous = round
            .checked_sub(1)
            .ok_or(Error::PredecessorPending(0))?;
        let previous = self
            .beacon(previous)
            .ok_or(Error::PredecessorPending(previous))?;
        let signature = match &self.config.mode {
            Mode::Threshold(signer) => Some(signer.sign_round(round, &previous.output).value),
            Mode::Development => None,
        };
        let share = VrfShare { round, signature };
        let outcome = self.add_share(self.index(), share.clone())?;
        debug!(round, ?outcome, "recorded own share");
        Ok(share)
    }

    /// Drops the records of every round before `round`.
    pub fn prune(&self, round: u64) {
        let mut rounds = self.rounds.write().unwrap_or_else(PoisonError::into_inner);
        let before = rounds.len();
        rounds.retain(|r, _| *r >= round);
        debug!(round, pruned = before - rounds.len(), "pruned rounds");
    }

    /// Derives the beacon of `round` and of every following round that was held.
    fn complete(&self, round: u64) -> Result<Outcome, Error> {
        let mut outcome = Outcome::Held;
        let mut current = round;
        loop {
            let Some(previous) = self.beacon(current - 1) else {
                if current == round {
                    debug!(round, "holding round until predecessor completes");
                }
                break;
            };
            let Some(record) = self.record(current) else {
                break;
            };
            let mut record = record.write().unwrap_or_else(PoisonError::into_inner);
            if record.beacon().is_some() || record.len() < self.config.threshold {
                if current == round {
                    outcome = Outcome::Recorded;
                }
                break;
            }

            let start = Instant::now();
            let beacon = match self.derive(current, &previous, &record) {
                Ok(beacon) => beacon,
                Err(Error::ShareInvalid(sender)) => {
                    let moved = record.evict(sender, self.config.threshold);
                    warn!(round = current, sender, moved, "evicted invalid share");
                    continue;
                }
                Err(err) if current == round => return Err(err),
                Err(err) => {
                    warn!(?err, round = current, "failed to derive held beacon");
                    break;
                }
            };
            record.set_beacon(beacon);
            drop(record);

            let elapsed = start.elapsed();
            if elapsed > self.config.slow_beacon {
                warn!(round = current, ?elapsed, "slow beacon");
            }
            info!(round = current, seed = beacon.seed, "derived beacon");
            self.config.advancer.start_round(current, beacon.seed);
            if current == round {
                outcome = Outcome::Completed(beacon);
            }
            current += 1;
        }
        Ok(outcome)
    }

    fn derive(&self, round: u64, previous: &Beacon, record: &Round) -> Result<Beacon, Error> {
        match &self.config.mode {
            Mode::Threshold(signer) => signer
                .combine_shares(round, &previous.output, &record.partials())
                .map(|signature| Beacon::threshold(round, &signature)),
            Mode::Development => Ok(Beacon::development(previous)),
        }
    }

    fn record(&self, round: u64) -> Option<Arc<RwLock<Round>>> {
        self.rounds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&round)
            .cloned()
    }

    fn record_or_insert(&self, round: u64) -> Arc<RwLock<Round>> {
        if let Some(record) = self.record(round) {
            return record;
        }
        self.rounds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(round)
            .or_default()
            .clone()
    }
}

/// Returns the outcome for a share `record` does not accept from `sender`.
fn reject(record: &Round, sender: u32) -> Option<Outcome> {
    if record.beacon().is_some() {
        return Some(Outcome::Stale);
    }
    if record.contains(sender) {
        return Some(Outcome::Duplicate);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{beacon::Signer, mocks::advancer::Recorder};
    use epochal_cryptography::bls12381::{
        dkg::ops::generate_shares,
        primitives::group::{Element, Signature},
    };
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::Duration;

    const GENESIS_SEED: u64 = 7;
    const MAX_AHEAD: u64 = 16;

    fn signers(n: u32, t: u32, seed: u64) -> Vec<Signer> {
        let (public, shares) = generate_shares(&mut StdRng::seed_from_u64(seed), n, t);
        shares
            .into_iter()
            .map(|share| Signer::new(share, public.clone(), t).unwrap())
            .collect()
    }

    fn driver(signer: Option<Signer>, threshold: u32) -> (Driver<Recorder, Recorder>, Recorder) {
        let recorder = Recorder::new();
        let me = signer.as_ref().map(|s| s.index()).unwrap_or(0);
        let driver = Driver::new(Config {
            me,
            threshold,
            mode: signer.map(Mode::Threshold).unwrap_or(Mode::Development),
            genesis_seed: GENESIS_SEED,
            slow_beacon: Duration::from_secs(1),
            max_ahead: MAX_AHEAD,
            advancer: recorder.clone(),
            finalized: recorder.clone(),
        })
        .unwrap();
        (driver, recorder)
    }

    fn share(signer: &Signer, round: u64, previous: &Beacon) -> VrfShare {
        VrfShare {
            round,
            signature: Some(signer.sign_round(round, &previous.output).value),
        }
    }

    #[test]
    fn test_completes_at_threshold() {
        let signers = signers(4, 3, 0);
        let (driver, recorder) = driver(Some(signers[0].clone()), 3);
        let genesis = Beacon::genesis(GENESIS_SEED);

        assert_eq!(
            driver.add_share(1, share(&signers[1], 1, &genesis)),
            Ok(Outcome::Recorded)
        );
        assert_eq!(
            driver.add_share(1, share(&signers[1], 1, &genesis)),
            Ok(Outcome::Duplicate)
        );
        assert_eq!(driver.recorded(1), 1);
        assert_eq!(
            driver.add_share(2, share(&signers[2], 1, &genesis)),
            Ok(Outcome::Recorded)
        );
        let Ok(Outcome::Completed(beacon)) = driver.add_share(3, share(&signers[3], 1, &genesis))
        else {
            panic!("round should complete");
        };
        assert_eq!(driver.beacon(1), Some(beacon));
        assert_eq!(recorder.started(), vec![(1, beacon.seed)]);

        // Late shares do not re-derive
        assert_eq!(
            driver.add_share(0, share(&signers[0], 1, &genesis)),
            Ok(Outcome::Stale)
        );
        assert_eq!(recorder.started().len(), 1);
    }

    #[test]
    fn test_nodes_agree_on_seed() {
        let signers = signers(5, 3, 1);
        let genesis = Beacon::genesis(GENESIS_SEED);
        let (first, _) = driver(Some(signers[0].clone()), 3);
        let (second, _) = driver(Some(signers[4].clone()), 3);

        for i in [0, 1, 2] {
            first.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        for i in [4, 3, 1] {
            second.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        assert_eq!(first.beacon(1), second.beacon(1));
        assert!(first.beacon(1).is_some());
    }

    #[test]
    fn test_held_round_drops_then_cascades() {
        let signers = signers(4, 3, 2);
        let genesis = Beacon::genesis(GENESIS_SEED);

        // Learn round 1's beacon on a reference driver
        let (reference, _) = driver(Some(signers[0].clone()), 3);
        for i in 0..3 {
            reference.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        let first = reference.beacon(1).unwrap();

        // Round 2 collects before round 1 completes
        let (driver, recorder) = driver(Some(signers[0].clone()), 3);
        for i in 0..2 {
            assert_eq!(
                driver.add_share(i, share(&signers[i as usize], 2, &first)),
                Ok(Outcome::Recorded)
            );
        }
        assert_eq!(
            driver.add_share(2, share(&signers[2], 2, &first)),
            Ok(Outcome::Held)
        );
        assert_eq!(
            driver.add_share(3, share(&signers[3], 2, &first)),
            Ok(Outcome::Dropped)
        );
        assert_eq!(driver.recorded(2), 3);
        assert!(recorder.started().is_empty());

        // Completing round 1 completes round 2
        for i in 1..4 {
            driver.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        let second = driver.beacon(2).unwrap();
        assert_eq!(
            recorder.started(),
            vec![(1, first.seed), (2, second.seed)]
        );
    }

    #[test]
    fn test_invalid_share_rejected_when_verifiable() {
        let signers = signers(4, 3, 3);
        let genesis = Beacon::genesis(GENESIS_SEED);
        let (driver, recorder) = driver(Some(signers[0].clone()), 3);

        driver.add_share(0, share(&signers[0], 1, &genesis)).unwrap();
        driver.add_share(1, share(&signers[1], 1, &genesis)).unwrap();

        // Signed over the wrong round
        let wrong = VrfShare {
            round: 1,
            ..share(&signers[2], 9, &genesis)
        };
        assert_eq!(driver.add_share(2, wrong), Err(Error::ShareInvalid(2)));
        assert_eq!(driver.recorded(1), 2);
        assert!(recorder.started().is_empty());

        assert!(matches!(
            driver.add_share(3, share(&signers[3], 1, &genesis)),
            Ok(Outcome::Completed(_))
        ));
    }

    #[test]
    fn test_held_round_survives_invalid_share() {
        let signers = signers(4, 3, 7);
        let genesis = Beacon::genesis(GENESIS_SEED);
        let (reference, _) = driver(Some(signers[0].clone()), 3);
        for i in 0..3 {
            reference.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        let first = reference.beacon(1).unwrap();

        // Round 2 fills up (with one share signed over the wrong round) before round 1
        let (driver, recorder) = driver(Some(signers[0].clone()), 3);
        let wrong = VrfShare {
            round: 2,
            ..share(&signers[1], 99, &first)
        };
        assert_eq!(
            driver.add_share(0, share(&signers[0], 2, &first)),
            Ok(Outcome::Recorded)
        );
        assert_eq!(driver.add_share(1, wrong), Ok(Outcome::Recorded));
        assert_eq!(
            driver.add_share(2, share(&signers[2], 2, &first)),
            Ok(Outcome::Held)
        );
        assert_eq!(
            driver.add_share(3, share(&signers[3], 2, &first)),
            Ok(Outcome::Dropped)
        );
        assert_eq!(
            driver.add_share(3, share(&signers[3], 2, &first)),
            Ok(Outcome::Duplicate)
        );
        assert_eq!(driver.recorded(2), 3);

        // Completing round 1 evicts the invalid share and completes round 2 with the
        // reserved one
        for i in 1..4 {
            driver.add_share(i, share(&signers[i as usize], 1, &genesis)).unwrap();
        }
        let second = driver.beacon(2).unwrap();
        assert_eq!(second, reference_round(&signers, &first));
        assert_eq!(driver.recorded(2), 3);
        assert_eq!(
            recorder.started(),
            vec![(1, first.seed), (2, second.seed)]
        );
    }

    /// Derives round 2 from valid shares only.
    fn reference_round(signers: &[Signer], first: &Beacon) -> Beacon {
        let partials = [0, 2, 3]
            .iter()
            .map(|i| signers[*i].sign_round(2, &first.output))
            .collect::<Vec<_>>();
        let signature = signers[0].combine_shares(2, &first.output, &partials).unwrap();
        Beacon::threshold(2, &signature)
    }

    #[test]
    fn test_far_ahead_rounds_are_stale() {
        let signers = signers(3, 2, 8);
        let (driver, recorder) = driver(Some(signers[0].clone()), 2);
        let far = |round| VrfShare {
            round,
            signature: Some(Signature::one()),
        };
        assert_eq!(driver.add_share(1, far(MAX_AHEAD + 1)), Ok(Outcome::Stale));
        assert_eq!(driver.add_share(1, far(u64::MAX)), Ok(Outcome::Stale));
        assert_eq!(driver.recorded(MAX_AHEAD + 1), 0);
        assert_eq!(driver.add_share(1, far(MAX_AHEAD)), Ok(Outcome::Recorded));

        // The window moves with the finalized round
        recorder.finalize(10);
        assert_eq!(driver.add_share(1, far(MAX_AHEAD + 1)), Ok(Outcome::Recorded));
        assert_eq!(driver.add_share(1, far(MAX_AHEAD + 11)), Ok(Outcome::Stale));
    }

    #[test]
    fn test_stale_and_missing_signature() {
        let signers = signers(3, 2, 4);
        let (driver, recorder) = driver(Some(signers[0].clone()), 2);
        recorder.finalize(5);
        assert_eq!(
            driver.add_share(
                1,
                VrfShare {
                    round: 4,
                    signature: Some(Signature::one())
                }
            ),
            Ok(Outcome::Stale)
        );
        assert_eq!(
            driver.add_share(
                1,
                VrfShare {
                    round: 6,
                    signature: None
                }
            ),
            Err(Error::MissingSignature)
        );
        assert_eq!(driver.recorded(6), 0);
    }

    #[test]
    fn test_development_seeds() {
        let (first, first_recorder) = driver(None, 2);
        let (second, _) = driver(None, 2);
        let unsigned = |round| VrfShare {
            round,
            signature: None,
        };

        for driver in [&first, &second] {
            for round in 1..=2 {
                driver.add_share(5, unsigned(round)).unwrap();
                driver.add_share(6, unsigned(round)).unwrap();
            }
        }
        let one = first.beacon(1).unwrap();
        let two = first.beacon(2).unwrap();
        assert_eq!(second.beacon(1), Some(one));
        assert_eq!(second.beacon(2), Some(two));
        assert_eq!(one, Beacon::development(&Beacon::genesis(GENESIS_SEED)));
        assert_eq!(two, Beacon::development(&one));
        assert_eq!(first_recorder.started(), vec![(1, one.seed), (2, two.seed)]);
    }

    #[test]
    fn test_partial() {
        let signers = signers(3, 2, 5);
        let (driver, recorder) = driver(Some(signers[1].clone()), 2);
        assert_eq!(driver.partial(2), Err(Error::PredecessorPending(1)));

        let own = driver.partial(1).unwrap();
        assert_eq!(driver.recorded(1), 1);
        assert!(own.signature.is_some());

        let genesis = Beacon::genesis(GENESIS_SEED);
        assert!(matches!(
            driver.add_share(2, share(&signers[2], 1, &genesis)),
            Ok(Outcome::Completed(_))
        ));
        assert_eq!(recorder.started().len(), 1);
        driver.partial(2).unwrap();
    }

    #[test]
    fn test_prune() {
        let (driver, _) = driver(None, 1);
        for round in 1..=4 {
            driver.partial(round).unwrap();
        }
        driver.prune(3);
        assert_eq!(driver.beacon(2), None);
        assert!(driver.beacon(3).is_some());
        assert!(driver.beacon(4).is_some());
    }

    #[test]
    fn test_concurrent_shares_start_once() {
        let (n, t) = (16, 5);
        let signers = signers(n, t, 6);
        let genesis = Beacon::genesis(GENESIS_SEED);
        let (driver, recorder) = driver(Some(signers[0].clone()), t);
        std::thread::scope(|scope| {
            for signer in &signers {
                let driver = &driver;
                let genesis = &genesis;
                scope.spawn(move || {
                    driver
                        .add_share(signer.index(), share(signer, 1, genesis))
                        .unwrap();
                });
            }
        });
        assert_eq!(recorder.started().len(), 1);
        assert_eq!(driver.recorded(1), t);
    }
}
