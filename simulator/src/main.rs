//! Run a local network of consensus cores through key generation, beacon rounds, and a
//! view change.
//!
//! Every participant runs a DKG [Manager] and a beacon [Driver] behind a [Handler],
//! exchanging messages over an in-memory network. Once the group key is known, the
//! participants derive `--rounds` beacons and check they agree on every seed. Finally,
//! a set of replicas walks the view-change cycle once (applying the same transactions
//! to their own state) and checks they commit the same magic block.

use bytes::Bytes;
use clap::Parser;
use epochal_codec::{DecodeExt, Encode};
use epochal_consensus::{
    beacon::{self, Config as BeaconConfig, Driver, Mode, Signer},
    dkg::{self, Config as DkgConfig, Manager, Output},
    handler::Handler,
    mocks::{
        advancer::Recorder,
        network::{Inbox, Link, Network},
        state::Memory,
    },
    roster::Participants,
    viewchange::{
        self, ack_payload, ceil_percent, keys, Config as ViewChangeConfig, MagicBlock, Node,
        Phase, PhaseRounds, Pool, ShareOrSign, ShareOrSigns, ViewChange, ACK_NAMESPACE,
    },
    wire::Message,
    NodeId, Reporter, Roster, Sender as _, State,
};
use epochal_cryptography::bls12381::{
    dkg::ops::generate_shares,
    primitives::{
        group,
        ops::{keypair, sign_message},
    },
};
use futures::future::try_join_all;
use rand::{rngs::StdRng, SeedableRng};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};

/// Simulator CLI.
#[derive(Parser)]
#[command(about = "simulate key generation, beacon rounds, and a view change")]
struct Args {
    /// The number of participants.
    #[arg(long, default_value_t = 4)]
    participants: u32,

    /// The share of participants (as a percentage, rounded up) required to derive a beacon.
    #[arg(long, default_value_t = 67)]
    k_percent: u32,

    /// The share of participants (as a percentage, rounded up) required to recover a
    /// view-change key.
    #[arg(long, default_value_t = 51)]
    t_percent: u32,

    /// The number of beacon rounds to run.
    #[arg(long, default_value_t = 10)]
    rounds: u64,

    /// Derive beacons without threshold keys (not consensus-safe).
    #[arg(long)]
    development: bool,

    /// The number of replicas executing the view change.
    #[arg(long, default_value_t = 2)]
    replicas: usize,

    /// The seed used for all randomness.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Seconds to wait for any step to complete.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// The log level for traces. opts: (error, debug, info, warn, trace)
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[derive(Error, Debug)]
enum Error {
    #[error("dkg: {0}")]
    Dkg(#[from] dkg::Error),
    #[error("beacon: {0}")]
    Beacon(#[from] beacon::Error),
    #[error("view change: {0}")]
    ViewChange(#[from] viewchange::Error),
    #[error("state: {0}")]
    State(#[from] epochal_consensus::StoreError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("participants disagree on round {round}")]
    Disagreement { round: u64 },
    #[error("replicas committed different magic blocks")]
    Diverged,
    #[error("view change did not complete within {0} rounds")]
    Incomplete(u64),
    #[error("at least one participant and one replica are required")]
    Empty,
}

type NodeHandler = Handler<Participants, Recorder, Recorder>;

/// Rounds past the latest finalized round a driver accepts shares for.
const MAX_AHEAD: u64 = 16;

/// A participant of the simulated network.
struct Participant {
    id: NodeId,
    link: Link,
    handler: Arc<NodeHandler>,
    manager: Arc<Manager<Participants>>,
}

/// Delivers every payload in `inbox` to `handler`.
async fn serve(id: NodeId, handler: Arc<NodeHandler>, mut inbox: Inbox) {
    while let Some((from, payload)) = inbox.recv().await {
        match handler.handle(&from, payload) {
            Ok(delivery) => debug!(me = %id, %from, ?delivery, "handled message"),
            Err(err) => warn!(me = %id, %from, ?err, "rejected message"),
        }
    }
}

/// Runs a DKG among all participants and returns each participant's output.
async fn generate(
    args: &Args,
    network: &Network,
    roster: &Participants,
    k: u32,
) -> Result<(Vec<Participant>, Vec<Output>), Error> {
    let mut participants = Vec::new();
    for index in 0..args.participants {
        let id = format!("node-{index}");
        let manager = Manager::new(
            DkgConfig {
                me: id.clone(),
                session: 1,
                roster: roster.clone(),
                threshold: k,
                rebroadcast: Duration::from_millis(200),
            },
            &mut StdRng::seed_from_u64(args.seed + index as u64),
        )?;
        let manager = Arc::new(manager);
        let handler = Arc::new(Handler::new(roster.clone()));
        handler.set_session(manager.clone());
        let (link, inbox) = network.register(&id);
        tokio::spawn(serve(id.clone(), handler.clone(), inbox));
        tokio::spawn(manager.clone().run(link.clone()));
        participants.push(Participant {
            id,
            link,
            handler,
            manager,
        });
    }

    let timeout = Duration::from_secs(args.timeout);
    let outputs = tokio::time::timeout(
        timeout,
        try_join_all(
            participants
                .iter()
                .map(|participant| participant.manager.wait_until_complete()),
        ),
    )
    .await
    .map_err(|_| Error::Timeout("dkg"))??;
    info!(
        participants = outputs.len(),
        threshold = k,
        delivered = network.delivered(),
        "generated group key"
    );
    Ok((participants, outputs))
}

/// Derives `args.rounds` beacons and checks every participant derived the same seeds.
async fn randomness(
    args: &Args,
    roster: &Participants,
    participants: &mut [Participant],
    outputs: Vec<Output>,
    k: u32,
) -> Result<(), Error> {
    let mut drivers = Vec::new();
    let mut advancers = Vec::new();
    let mut started = Vec::new();
    for (participant, output) in participants.iter().zip(outputs) {
        let mode = if args.development {
            Mode::Development
        } else {
            Mode::Threshold(Signer::new(output.share, output.public, k)?)
        };
        let (advancer, notify) = Recorder::with_notify();
        let driver = Arc::new(Driver::new(BeaconConfig {
            me: participant.manager.index(),
            threshold: k,
            mode,
            genesis_seed: args.seed,
            slow_beacon: Duration::from_millis(500),
            max_ahead: MAX_AHEAD,
            advancer: advancer.clone(),
            finalized: advancer.clone(),
        })?);
        participant.handler.set_driver(driver.clone());
        drivers.push(driver);
        advancers.push(advancer);
        started.push(notify);
    }

    let timeout = Duration::from_secs(args.timeout);
    for round in 1..=args.rounds {
        for (participant, driver) in participants.iter_mut().zip(&drivers) {
            let payload: Bytes = Message::Vrf(driver.partial(round)?).encode().freeze();
            for peer in roster.participants() {
                if peer.id == participant.id {
                    continue;
                }
                if let Err(err) = participant.link.send(&peer.id, payload.clone()).await {
                    warn!(me = %participant.id, ?err, "failed to send share");
                }
            }
        }
        let mut seeds = Vec::new();
        for notify in &mut started {
            seeds.push(next_start(notify, round, timeout).await?);
        }
        if seeds.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(Error::Disagreement { round });
        }
        info!(round, seed = seeds[0], "started round");
        if round > 2 {
            for (driver, advancer) in drivers.iter().zip(&advancers) {
                advancer.finalize(round - 2);
                driver.prune(round - 2);
            }
        }
    }
    Ok(())
}

/// Waits for `round` to be started, skipping earlier rounds.
async fn next_start(
    notify: &mut mpsc::UnboundedReceiver<(u64, u64)>,
    round: u64,
    timeout: Duration,
) -> Result<u64, Error> {
    loop {
        let next = tokio::time::timeout(timeout, notify.recv())
            .await
            .map_err(|_| Error::Timeout("beacon"))?;
        match next {
            Some((started, seed)) if started == round => return Ok(seed),
            Some(_) => continue,
            None => return Err(Error::Timeout("beacon")),
        }
    }
}

/// Logs view-change progress.
struct Logger {
    replica: usize,
}

impl Reporter for Logger {
    fn phase(&self, phase: Phase, round: u64) {
        info!(replica = self.replica, %phase, round, "entered phase");
    }
}

/// A replica of the replicated state and the machine advancing it.
struct Replica {
    state: Memory,
    machine: ViewChange<Logger>,
}

/// Walks the view-change cycle once on every replica.
fn rotate(args: &Args) -> Result<MagicBlock, Error> {
    let config = ViewChangeConfig {
        rounds: PhaseRounds {
            start: 2,
            contribute: 2,
            share: 2,
            publish: 1,
            wait: 2,
        },
        min_n: args.participants,
        max_n: args.participants,
        k_percent: args.k_percent,
        t_percent: args.t_percent,
    };
    let replicas = (0..args.replicas)
        .map(|replica| {
            Ok(Replica {
                state: Memory::new(),
                machine: ViewChange::new(config.clone(), Logger { replica })?,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    // Register candidates and sharders
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut miners = Pool::default();
    let mut private = BTreeMap::<NodeId, group::Private>::new();
    for index in 0..args.participants {
        let (key, public_key) = keypair(&mut rng);
        let id = format!("node-{index}");
        private.insert(id.clone(), key);
        miners.add(Node {
            id,
            public_key,
            host: "127.0.0.1".to_string(),
            port: 7000 + index as u16,
            stake: 100,
        });
    }
    let mut sharders = Pool::default();
    for index in 0..2u16 {
        let (_, public_key) = keypair(&mut rng);
        sharders.add(Node {
            id: format!("sharder-{index}"),
            public_key,
            host: "127.0.0.1".to_string(),
            port: 8000 + index,
            stake: 0,
        });
    }
    for replica in &replicas {
        replica
            .state
            .put(keys::ALL_MINERS, miners.encode().freeze())?;
        replica
            .state
            .put(keys::ALL_SHARDERS, sharders.encode().freeze())?;
    }

    let n = args.participants;
    let t = ceil_percent(n, args.t_percent);
    let limit = 50;
    let mut dealings = BTreeMap::new();
    let mut previous = Phase::Start;
    for round in 1..=limit {
        let mut phase = None;
        for replica in &replicas {
            let node = replica.machine.advance(&replica.state, round)?;
            phase = Some(node.phase);
        }
        let Some(phase) = phase else {
            return Err(Error::Empty);
        };
        if phase == previous {
            continue;
        }
        match phase {
            Phase::Contribute => {
                for id in private.keys() {
                    let (commitment, shares) = generate_shares(&mut rng, n, t);
                    for replica in &replicas {
                        replica
                            .machine
                            .contribute_mpk(&replica.state, id, commitment.clone())?;
                    }
                    dealings.insert(id.clone(), (commitment, shares));
                }
                for replica in &replicas {
                    replica
                        .machine
                        .sharder_keep(&replica.state, &"sharder-0".to_string())?;
                }
            }
            Phase::Share => {
                for (dealer, (commitment, shares)) in &dealings {
                    // Every recipient acknowledges, except the dealer's successor whose
                    // share is revealed instead
                    let payload = ack_payload(dealer, commitment);
                    let mut entries = BTreeMap::new();
                    let ids = private.keys().collect::<Vec<_>>();
                    let position = ids.iter().position(|id| *id == dealer).unwrap_or(0);
                    let successor = ids[(position + 1) % ids.len()];
                    for (index, (recipient, key)) in private.iter().enumerate() {
                        if recipient == dealer {
                            continue;
                        }
                        let entry = if recipient == successor {
                            ShareOrSign::Share(shares[index].private)
                        } else {
                            ShareOrSign::Sign(sign_message(key, Some(ACK_NAMESPACE), &payload))
                        };
                        entries.insert(recipient.clone(), entry);
                    }
                    let sos = ShareOrSigns { entries };
                    for replica in &replicas {
                        replica
                            .machine
                            .share_signs_or_shares(&replica.state, dealer, sos.clone())?;
                    }
                }
            }
            Phase::Start if previous == Phase::Wait => {
                let mut blocks = Vec::new();
                for replica in &replicas {
                    let Some(raw) = replica.state.get(keys::ACTIVE_MAGIC_BLOCK)? else {
                        return Err(Error::ViewChange(viewchange::Error::MissingMagicBlock));
                    };
                    let block = MagicBlock::decode(raw).map_err(|source| {
                        viewchange::Error::Decode {
                            key: keys::ACTIVE_MAGIC_BLOCK,
                            source,
                        }
                    })?;
                    blocks.push(block);
                }
                if blocks.windows(2).any(|pair| pair[0].hash != pair[1].hash) {
                    return Err(Error::Diverged);
                }
                return blocks.into_iter().next().ok_or(Error::Empty);
            }
            _ => {}
        }
        previous = phase;
    }
    Err(Error::Incomplete(limit))
}

async fn run(args: Args) -> Result<(), Error> {
    if args.participants == 0 || args.replicas == 0 {
        return Err(Error::Empty);
    }
    let ids = (0..args.participants).map(|index| format!("node-{index}"));
    let roster = Participants::new(ids);
    let k = ceil_percent(args.participants, args.k_percent).max(1);
    info!(
        participants = args.participants,
        k,
        development = args.development,
        "starting simulation"
    );

    let network = Network::new();
    let (mut participants, outputs) = generate(&args, &network, &roster, k).await?;
    randomness(&args, &roster, &mut participants, outputs, k).await?;

    let block = rotate(&args)?;
    info!(
        number = block.number,
        miners = block.miners.len(),
        sharders = block.sharders.len(),
        starting_round = block.starting_round,
        hash = %block.hash,
        "activated magic block"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    if let Err(err) = run(args).await {
        error!(?err, "simulation failed");
        std::process::exit(1);
    }
}
