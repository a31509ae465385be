use super::{
    config::Config,
    ingress::{Mailbox, Message, Snapshot},
    metrics::{Inbound, Metrics},
    state::{self, Action, Moment, State, Status, Triage},
    types::{Context, Envelope, Limits, Message as Wire, Namespaces, Payload},
    verifier::Verifier,
};
use crate::{
    types::{epoch, Height, Round, ShardId},
    Beacon, BeaconChain, Execution, Receiver, Registry, Reporter, Sender,
};
use bytes::Bytes;
use futures::{
    channel::{mpsc, oneshot},
    future::{BoxFuture, Either},
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use prometheus_client::registry::Registry as Metered;
use rayon::ThreadPoolBuilder;
use shardline_codec::{Decode, Encode};
use shardline_cryptography::Digest;
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, trace, warn};

/// Maximum number of messages held while waiting for an epoch's committee.
const MAX_HELD: usize = 4_096;

type Verification = BoxFuture<'static, (Round, Digest, Result<bool, oneshot::Canceled>)>;

/// Requests made to execution that have not been answered yet.
#[derive(Default)]
struct Pending {
    propose: Option<(Context, oneshot::Receiver<Payload>)>,
    verify: FuturesUnordered<Verification>,
}

/// Drives a [State] for one shard: gossip in and out, deadlines and collaborators.
pub struct Engine<B: Beacon, G: Registry, X: Execution, P: Reporter, C: BeaconChain> {
    beacon: B,
    registry: G,
    execution: X,
    reporter: P,
    beacon_chain: C,

    shard: ShardId,
    limits: Limits,
    batch: usize,
    state: State,
    verifier: Verifier,
    held: Vec<Wire>,

    mailbox: mpsc::Receiver<Message>,
    metrics: Metrics,

    start: Instant,
    start_millis: u64,
}

impl<B: Beacon, G: Registry, X: Execution, P: Reporter, C: BeaconChain> Engine<B, G, X, P, C> {
    /// Create a new engine, registering its metrics with `registry`.
    pub fn new(cfg: Config<B, G, X, P, C>, registry: &mut Metered) -> (Self, Mailbox) {
        // Ensure configuration is valid
        cfg.assert();

        let metrics =
            Metrics::init(registry.sub_registry_with_prefix(format!("shard_{}", cfg.shard)));
        let namespaces = Namespaces::new(&cfg.namespace);
        let pool = if cfg.verification_concurrency > 1 {
            match ThreadPoolBuilder::new()
                .num_threads(cfg.verification_concurrency)
                .build()
            {
                Ok(pool) => Some(Arc::new(pool)),
                Err(err) => {
                    warn!(?err, "unable to create verification pool, verifying inline");
                    None
                }
            }
        } else {
            None
        };
        let verifier = Verifier::new(namespaces.clone(), cfg.epoch_length, pool);

        let start = Instant::now();
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64);
        let state = State::new(
            state::Config {
                signer: cfg.signer,
                id: cfg.id,
                namespaces,
                shard: cfg.shard,
                shard_count: cfg.shard_count,
                min_committee_size: cfg.min_committee_size,
                epoch_length: cfg.epoch_length,
                base_timeout: cfg.base_timeout,
                max_timeout: cfg.max_timeout,
                view_change_retry: cfg.view_change_retry,
                stall_threshold: cfg.stall_threshold,
                seed_retry: cfg.seed_retry,
                max_block_size: cfg.max_block_size,
                max_clock_skew: cfg.max_clock_skew,
                max_committee_size: cfg.limits.max_committee_size,
                crosslink_interval: cfg.crosslink_interval,
            },
            cfg.tip,
            metrics.clone(),
            Moment {
                instant: start.into_std(),
                millis: start_millis,
            },
        );

        let (sender, mailbox) = mpsc::channel(cfg.mailbox_size);
        (
            Self {
                beacon: cfg.beacon,
                registry: cfg.registry,
                execution: cfg.execution,
                reporter: cfg.reporter,
                beacon_chain: cfg.beacon_chain,

                shard: cfg.shard,
                limits: cfg.limits,
                batch: cfg.verification_batch,
                state,
                verifier,
                held: Vec::new(),

                mailbox,
                metrics,

                start,
                start_millis,
            },
            Mailbox::new(sender),
        )
    }

    /// Start the engine on the current tokio runtime.
    ///
    /// The engine runs until the transport closes or every [Mailbox] is dropped.
    pub fn start(self, sender: impl Sender, receiver: impl Receiver) -> JoinHandle<()> {
        tokio::spawn(self.run(sender, receiver))
    }

    fn now(&self) -> Moment {
        let instant = Instant::now();
        let elapsed = instant.duration_since(self.start).as_millis() as u64;
        Moment {
            instant: instant.into_std(),
            millis: self.start_millis.saturating_add(elapsed),
        }
    }

    fn snapshot(&self) -> Snapshot {
        let round = self.state.round();
        Snapshot {
            status: self.state.status(),
            round,
            epoch: epoch(round.height, self.state.epoch_length()),
            tip: *self.state.tip(),
        }
    }

    async fn run(mut self, mut sender: impl Sender, mut receiver: impl Receiver) {
        let mut pending = Pending::default();
        info!(shard = self.shard, tip = self.state.tip().height, "starting shard engine");
        let actions = self.state.start(self.now());
        self.execute(&mut sender, &mut pending, actions).await;

        loop {
            let before = self.progress();
            let propose_wait = match &mut pending.propose {
                Some((_, waiter)) => Either::Left(waiter),
                None => Either::Right(futures::future::pending()),
            };
            let has_verify = !pending.verify.is_empty();
            let deadline = Instant::from_std(self.state.deadline());

            let actions = tokio::select! {
                _ = sleep_until(deadline) => {
                    self.state.timeout(self.now())
                },
                proposed = propose_wait => {
                    let Some((context, _)) = pending.propose.take() else {
                        continue;
                    };
                    match proposed {
                        Ok(payload) => self.state.proposed(context, payload, self.now()),
                        Err(err) => {
                            debug!(?err, round = %context.round, "failed to propose block");
                            continue;
                        }
                    }
                },
                Some((round, digest, verified)) = pending.verify.next(), if has_verify => {
                    match verified {
                        Ok(valid) => self.state.verified(round, digest, valid, self.now()),
                        Err(err) => {
                            debug!(?err, %round, "failed to verify block");
                            continue;
                        }
                    }
                },
                request = self.mailbox.next() => {
                    let Some(request) = request else {
                        debug!("mailbox closed, shutting down");
                        break;
                    };
                    match request {
                        Message::Status(response) => {
                            let _ = response.send(self.snapshot());
                        }
                    }
                    continue;
                },
                message = receiver.recv() => {
                    let Some(message) = message else {
                        debug!("transport closed, shutting down");
                        break;
                    };

                    // Collect whatever else is ready so signatures are verified together
                    let mut batch = vec![message];
                    while batch.len() < self.batch {
                        match receiver.recv().now_or_never() {
                            Some(Some(message)) => batch.push(message),
                            _ => break,
                        }
                    }
                    let messages = self.decode(batch);
                    self.deliver(messages)
                },
            };
            self.execute(&mut sender, &mut pending, actions).await;

            // Held messages may have become useful
            if self.progress() != before && !self.held.is_empty() {
                let held = std::mem::take(&mut self.held);
                let actions = self.deliver(held);
                self.execute(&mut sender, &mut pending, actions).await;
            }
        }
    }

    fn progress(&self) -> (Height, bool) {
        (
            self.state.round().height,
            self.state.status() == Status::AwaitingCommittee,
        )
    }

    fn decode(&self, batch: Vec<Bytes>) -> Vec<Wire> {
        let mut messages = Vec::with_capacity(batch.len());
        for bytes in batch {
            let envelope = match Envelope::decode_cfg(bytes, &self.limits) {
                Ok(envelope) => envelope,
                Err(err) => {
                    debug!(?err, "dropping undecodable message");
                    self.metrics.invalid.inc();
                    continue;
                }
            };
            if envelope.shard != self.shard {
                trace!(shard = envelope.shard, "dropping message for another shard");
                continue;
            }
            self.metrics
                .inbound
                .get_or_create(&Inbound::of(&envelope.message))
                .inc();
            messages.push(envelope.message);
        }
        messages
    }

    /// Triage, verify and apply `messages`.
    fn deliver(&mut self, messages: Vec<Wire>) -> Vec<Action> {
        let mut ready = Vec::with_capacity(messages.len());
        for message in messages {
            match self.state.triage(&message) {
                Triage::Process => ready.push(message),
                Triage::Hold if self.held.len() < MAX_HELD => self.held.push(message),
                Triage::Hold | Triage::Drop => {
                    trace!(kind = message.kind(), height = message.height(), "dropping message");
                }
            }
        }
        if ready.is_empty() {
            return Vec::new();
        }

        let count = ready.len();
        let verified = self.verifier.verify(&self.state.committees(), ready);
        let invalid = count - verified.len();
        if invalid > 0 {
            debug!(invalid, "dropping messages that failed verification");
            self.metrics.invalid.inc_by(invalid as u64);
        }
        let mut actions = Vec::new();
        for message in verified {
            actions.extend(self.state.handle(message, self.now()));
        }
        actions
    }

    async fn execute(
        &mut self,
        sender: &mut impl Sender,
        pending: &mut Pending,
        actions: Vec<Action>,
    ) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Broadcast(message) => {
                    let envelope = Envelope {
                        shard: self.shard,
                        message,
                    };
                    sender.broadcast(envelope.encode().freeze()).await;
                }
                Action::Propose(context) => {
                    let receiver = self.execution.propose(context.clone()).await;
                    pending.propose = Some((context, receiver));
                }
                Action::Verify(context, block) => {
                    let round = context.round;
                    let digest = block.digest();
                    let receiver = self.execution.verify(context, block).await;
                    pending
                        .verify
                        .push(async move { (round, digest, receiver.await) }.boxed());
                }
                Action::Report(activity) => self.reporter.report(activity).await,
                Action::Link(payload) => {
                    let latest = self.beacon_chain.latest(self.shard).await;
                    queue.extend(self.state.linked(payload, latest));
                }
                Action::Submit(crosslink) => {
                    let result = self.beacon_chain.submit(crosslink.clone()).await;
                    queue.extend(self.state.crosslink_result(&crosslink, result));
                }
                Action::FetchCommittee(epoch) => {
                    let seed = self.beacon.seed(epoch).await;
                    let validators = self.registry.validators(epoch).await;
                    queue.extend(self.state.epoch_ready(epoch, seed, validators, self.now()));
                }
            }
        }
    }
}
