use super::{
    ceil_percent, keys,
    state::Batch,
    transition, Action, Condition, Config, DkgSet, Error, GroupSharesOrSigns, MagicBlock, Member,
    Mpks, Phase, PhaseNode, Pool, Transition,
};
use crate::{Reporter, State};
use std::{
    cmp::Reverse,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, warn};

/// The replicated view-change state machine.
///
/// [ViewChange::advance] and the transactions (`contribute_mpk`, `share_signs_or_shares`
/// and `sharder_keep`) serialize on a single lock, so no two of them interleave.
pub struct ViewChange<R: Reporter> {
    pub(super) config: Config,
    reporter: R,
    lock: Mutex<()>,
}

impl<R: Reporter> ViewChange<R> {
    /// Creates a machine, rejecting a `config` whose percentages or set bounds could
    /// size a DKG set outside `1 <= K, T <= N`.
    pub fn new(config: Config, reporter: R) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            reporter,
            lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Processes `round`: if the current phase has dwelt long enough, either advances it
    /// (when its condition holds and its action succeeds) or restarts the session.
    ///
    /// Returns the resulting phase node. An error is only returned if the state could not
    /// be read or written, in which case nothing was written and processing of the
    /// enclosing block must be aborted.
    pub fn advance<S: State>(&self, state: &S, round: u64) -> Result<PhaseNode, Error> {
        let _guard = self.guard();
        let mut batch = Batch::new(state);
        let mut node = match batch.get_optional::<PhaseNode>(keys::PHASE) {
            Ok(Some(node)) => node,
            Ok(None) => PhaseNode {
                start_round: round,
                ..Default::default()
            },
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(?err, "unreadable phase node, starting over");
                PhaseNode {
                    start_round: round,
                    ..Default::default()
                }
            }
        };
        node.current_round = round;

        let mut advanced = None;
        if round.saturating_sub(node.start_round) >= self.config.rounds.get(node.phase) {
            let phase = node.phase;
            let transition = transition(phase);
            let checkpoint = batch.checkpoint();
            match self.evaluate(&mut batch, &node, transition) {
                Ok(()) => {
                    node.phase = transition.next;
                    node.start_round = round;
                    if node.phase == Phase::Start {
                        node.restarts = 0;
                    }
                    info!(from = %phase, to = %node.phase, round, "advanced phase");
                    advanced = Some(node.phase);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    batch.rollback(checkpoint);
                    restart(&mut batch, &mut node);
                    warn!(
                        ?err,
                        phase = %phase,
                        round,
                        restarts = node.restarts,
                        "restarted dkg"
                    );
                }
            }
        }
        batch.put(keys::PHASE, &node);
        batch.commit()?;

        if let Some(phase) = advanced {
            self.reporter.phase(phase, round);
        }
        Ok(node)
    }

    pub(super) fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evaluate<S: State>(
        &self,
        batch: &mut Batch<'_, S>,
        node: &PhaseNode,
        transition: Transition,
    ) -> Result<(), Error> {
        if !self.holds(batch, transition.condition)? {
            return Err(Error::MoveRejected(node.phase));
        }
        let Some(action) = transition.action else {
            return Ok(());
        };
        debug!(?action, round = node.current_round, "committing phase");
        match action {
            Action::CreateDkgSet => self.create_dkg_set(batch),
            Action::PruneDkgSet => prune_dkg_set(batch),
            Action::CreateMagicBlock => self.create_magic_block(batch, node),
            Action::ActivateMagicBlock => activate_magic_block(batch),
        }
    }

    fn holds<S: State>(&self, batch: &Batch<'_, S>, condition: Condition) -> Result<bool, Error> {
        Ok(match condition {
            Condition::EnoughCandidates => {
                let pool = batch.get::<Pool>(keys::ALL_MINERS)?.len() as u32;
                let k = ceil_percent(pool.min(self.config.max_n), self.config.k_percent);
                pool >= self.config.min_n.max(k)
            }
            Condition::EnoughCommitments => {
                let dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
                let mpks = batch.get::<Mpks>(keys::MPKS)?;
                dkg.k > 0 && mpks.mpks.len() as u32 >= dkg.k
            }
            Condition::EnoughShareSets => {
                let dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
                let shares = batch.get::<GroupSharesOrSigns>(keys::GROUP_SHARES_OR_SIGNS)?;
                dkg.k > 0 && shares.shares.len() as u32 >= dkg.k
            }
            Condition::Always => true,
        })
    }

    /// Selects the DKG set from the candidate pool (the highest-staked `max_n`, ties
    /// broken by id) and sizes `N`, `K` and `T`.
    fn create_dkg_set<S: State>(&self, batch: &mut Batch<'_, S>) -> Result<(), Error> {
        let pool = batch.get::<Pool>(keys::ALL_MINERS)?;
        let have = pool.len() as u32;
        let need = self.config.min_n.max(1);
        if have < need {
            return Err(Error::TooFewCandidates { have, need });
        }
        let mut candidates = pool.nodes.into_values().collect::<Vec<_>>();
        if candidates.len() > self.config.max_n as usize {
            candidates.sort_by(|a, b| (Reverse(a.stake), &a.id).cmp(&(Reverse(b.stake), &b.id)));
            candidates.truncate(self.config.max_n as usize);
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let n = candidates.len() as u32;
        let (k, t) = self.config.thresholds(n)?;
        let dkg = DkgSet {
            n,
            k,
            t,
            members: candidates
                .into_iter()
                .enumerate()
                .map(|(index, node)| {
                    (
                        node.id.clone(),
                        Member {
                            node,
                            index: index as u32,
                            revealed_shares: 0,
                        },
                    )
                })
                .collect(),
        };
        info!(n = dkg.n, k = dkg.k, t = dkg.t, "created dkg set");
        batch.put(keys::DKG_MINERS, &dkg);
        batch.put(keys::SHARDERS_KEEP, &Pool::default());
        Ok(())
    }

    /// Prunes unresponsive participants and stages the next magic block.
    fn create_magic_block<S: State>(
        &self,
        batch: &mut Batch<'_, S>,
        node: &PhaseNode,
    ) -> Result<(), Error> {
        let mut dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
        let mut shares = batch.get::<GroupSharesOrSigns>(keys::GROUP_SHARES_OR_SIGNS)?;
        let mut mpks = batch.get::<Mpks>(keys::MPKS)?;

        // Drop participants that did not publish shares-or-signs (or whose share every
        // peer had to reveal)
        let n = dkg.n;
        dkg.members.retain(|id, member| {
            shares.shares.contains_key(id) && member.revealed_shares < n
        });
        mpks.mpks.retain(|id, _| dkg.members.contains_key(id));
        shares.shares.retain(|id, _| dkg.members.contains_key(id));
        let have = dkg.members.len() as u32;
        let need = dkg.k.max(1);
        if have < need {
            return Err(Error::TooFewSurvivors { have, need });
        }

        // Keep sharders that asked to stay and admit registered sharders that are new
        let active = batch.get_optional::<MagicBlock>(keys::ACTIVE_MAGIC_BLOCK)?;
        let mut sharders = batch.get::<Pool>(keys::SHARDERS_KEEP)?;
        for (id, sharder) in batch.get::<Pool>(keys::ALL_SHARDERS)?.nodes {
            if sharders.contains(&id) {
                continue;
            }
            let is_active = active
                .as_ref()
                .is_some_and(|block| block.sharders.contains(&id));
            if !is_active {
                sharders.add(sharder);
            }
        }

        let (number, previous_hash) = match &active {
            Some(block) => (block.number + 1, block.hash),
            None => (1, Default::default()),
        };
        let block = MagicBlock {
            number,
            previous_hash,
            starting_round: node.current_round + self.config.rounds.wait,
            miners: dkg.members,
            sharders,
            n: dkg.n,
            k: dkg.k,
            t: dkg.t,
            mpks,
            shares_or_signs: shares,
            hash: Default::default(),
        }
        .seal();
        info!(
            number = block.number,
            miners = block.miners.len(),
            sharders = block.sharders.len(),
            starting_round = block.starting_round,
            hash = %block.hash,
            "created magic block"
        );

        batch.put(keys::MPKS, &Mpks::default());
        batch.put(keys::GROUP_SHARES_OR_SIGNS, &GroupSharesOrSigns::default());
        batch.put(keys::DKG_MINERS, &DkgSet::default());
        batch.put(keys::SHARDERS_KEEP, &Pool::default());
        batch.put(keys::MAGIC_BLOCK, &block);
        Ok(())
    }
}

/// Drops DKG participants that did not contribute a commitment.
///
/// `N`, `K` and `T` keep the values sized at Start.
fn prune_dkg_set<S: State>(batch: &mut Batch<'_, S>) -> Result<(), Error> {
    let mut dkg = batch.get::<DkgSet>(keys::DKG_MINERS)?;
    let mpks = batch.get::<Mpks>(keys::MPKS)?;
    let before = dkg.members.len();
    dkg.members.retain(|id, _| mpks.mpks.contains_key(id));
    debug!(pruned = before - dkg.members.len(), "pruned dkg set");
    batch.put(keys::DKG_MINERS, &dkg);
    Ok(())
}

fn activate_magic_block<S: State>(batch: &mut Batch<'_, S>) -> Result<(), Error> {
    let block = batch
        .get_optional::<MagicBlock>(keys::MAGIC_BLOCK)?
        .ok_or(Error::MissingMagicBlock)?;
    info!(number = block.number, hash = %block.hash, "activated magic block");
    batch.put(keys::ACTIVE_MAGIC_BLOCK, &block);
    Ok(())
}

/// Clears every DKG accumulator and returns to [Phase::Start].
fn restart<S: State>(batch: &mut Batch<'_, S>, node: &mut PhaseNode) {
    batch.put(keys::MPKS, &Mpks::default());
    batch.put(keys::GROUP_SHARES_OR_SIGNS, &GroupSharesOrSigns::default());
    batch.put(keys::DKG_MINERS, &DkgSet::default());
    batch.put(keys::SHARDERS_KEEP, &Pool::default());
    node.phase = Phase::Start;
    node.restarts += 1;
    node.start_round = node.current_round;
}
