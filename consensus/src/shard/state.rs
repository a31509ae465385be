//! Per-shard consensus state machine.
//!
//! [State] owns every piece of mutable round state and never performs I/O. Each input (a verified
//! message, an execution response, a deadline, a committee) returns the [Action]s the caller must
//! perform, so the same machine runs inside the async [super::Engine] and in deterministic tests.

use super::{
    aggregator::{Added, Aggregator},
    block::{BlockStore, Rules},
    finalizer::{Collected, Finalizer},
    metrics::Metrics,
    select_committee,
    types::{
        highest, Activity, Alert, Block, Context, Crosslink, CrosslinkPayload, CrosslinkVote,
        Header, Message, Namespaces, NewView, Payload, Phase, Proof, Proposal, QuorumCertificate,
        SlashableEvidence, Tip, ViewChange, Vote,
    },
    view_change::{timeout, Collector},
    BlockError, Committee, Error, Seed, Validator,
};
use crate::{
    types::{epoch, Epoch, Height, Round, ShardId, ValidatorId, View},
    Rejection,
};
use shardline_codec::EncodeSize;
use shardline_cryptography::{bls12381::PrivateKey, Digest};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    mem::take,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

/// Messages for views further ahead than this are dropped.
pub const VIEW_LOOKAHEAD: View = 8;

/// Maximum number of verified messages held for the next height (or the next checkpoint).
pub const MAX_FUTURE: usize = 1_024;

/// Phase of the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Waiting for the committee of the current epoch.
    AwaitingCommittee,
    /// Leader of the current view, building a proposal.
    Proposing,
    /// Waiting for a proposal or for a pre-vote certificate.
    Voting,
    /// Pre-committed, waiting for a finality certificate.
    Committing,
    /// Timed out, waiting for a quorum to move to the next view.
    ViewChanging,
}

/// A point in time, as seen by the deadline clock and by block timestamps.
#[derive(Clone, Copy, Debug)]
pub struct Moment {
    pub instant: Instant,
    /// Milliseconds since the Unix epoch.
    pub millis: u64,
}

/// Side effects requested by the state machine.
#[derive(Debug)]
pub enum Action {
    /// Send a message to the rest of the committee.
    Broadcast(Message),
    /// Ask execution for a payload.
    Propose(Context),
    /// Ask execution to check a block.
    Verify(Context, Block),
    /// Forward an event to the reporter.
    Report(Activity),
    /// Look up the latest crosslink accepted by the beacon chain and pass it to
    /// [State::linked] with this checkpoint.
    Link(CrosslinkPayload),
    /// Submit a crosslink to the beacon chain.
    Submit(Crosslink),
    /// Fetch the seed and validators for an epoch.
    FetchCommittee(Epoch),
}

/// What to do with an inbound message before verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Triage {
    /// Verify and handle now.
    Process,
    /// Keep until the committee for its epoch is known.
    Hold,
    /// Not useful.
    Drop,
}

/// Configuration for [State].
pub struct Config {
    pub signer: PrivateKey,
    pub id: ValidatorId,
    pub namespaces: Namespaces,
    pub shard: ShardId,
    pub shard_count: u16,
    pub min_committee_size: usize,
    pub epoch_length: u64,
    pub base_timeout: Duration,
    pub max_timeout: Duration,
    pub view_change_retry: Duration,
    pub stall_threshold: u32,
    pub seed_retry: Duration,
    pub max_block_size: usize,
    pub max_clock_skew: Duration,
    pub max_committee_size: usize,
    pub crosslink_interval: u64,
}

pub struct State {
    signer: PrivateKey,
    id: ValidatorId,
    shard: ShardId,
    shard_count: u16,
    min_committee_size: usize,
    epoch_length: u64,
    base_timeout: Duration,
    max_timeout: Duration,
    view_change_retry: Duration,
    stall_threshold: u32,
    seed_retry: Duration,
    max_committee_size: usize,
    crosslink_interval: u64,
    rules: Rules,

    status: Status,
    round: Round,
    deadline: Instant,
    committees: BTreeMap<Epoch, Arc<Committee>>,
    halted: Option<Epoch>,

    finalizer: Finalizer,
    blocks: BlockStore,
    votes: Aggregator,
    view_changes: Collector,

    proposals: BTreeMap<Round, Proposal>,
    prevoted: BTreeSet<Round>,
    precommitted: BTreeSet<Round>,
    certified: BTreeMap<Round, QuorumCertificate>,
    pending_commits: HashMap<Digest, QuorumCertificate>,
    high_qc: Option<QuorumCertificate>,
    locked: Option<QuorumCertificate>,

    justify: Option<NewView>,
    proposed: bool,
    view_change: Option<ViewChange>,
    attempts: u32,
    alerted: bool,

    future: Vec<Message>,
    actions: Vec<Action>,
    metrics: Metrics,
}

impl State {
    /// Create a state machine that will build on `tip`. Call [State::start] to begin.
    pub fn new(cfg: Config, tip: Tip, metrics: Metrics, now: Moment) -> Self {
        assert!(cfg.epoch_length > 0, "epoch length must be greater than zero");
        Self {
            signer: cfg.signer,
            id: cfg.id,
            shard: cfg.shard,
            shard_count: cfg.shard_count,
            min_committee_size: cfg.min_committee_size,
            epoch_length: cfg.epoch_length,
            base_timeout: cfg.base_timeout,
            max_timeout: cfg.max_timeout,
            view_change_retry: cfg.view_change_retry,
            stall_threshold: cfg.stall_threshold,
            seed_retry: cfg.seed_retry,
            max_committee_size: cfg.max_committee_size,
            crosslink_interval: cfg.crosslink_interval,
            rules: Rules {
                namespaces: cfg.namespaces,
                max_block_size: cfg.max_block_size,
                max_clock_skew: cfg.max_clock_skew,
            },

            status: Status::AwaitingCommittee,
            round: Round::new(tip.height + 1, 0),
            deadline: now.instant,
            committees: BTreeMap::new(),
            halted: None,

            finalizer: Finalizer::new(cfg.shard, cfg.crosslink_interval, tip),
            blocks: BlockStore::default(),
            votes: Aggregator::default(),
            view_changes: Collector::default(),

            proposals: BTreeMap::new(),
            prevoted: BTreeSet::new(),
            precommitted: BTreeSet::new(),
            certified: BTreeMap::new(),
            pending_commits: HashMap::new(),
            high_qc: None,
            locked: None,

            justify: None,
            proposed: false,
            view_change: None,
            attempts: 0,
            alerted: false,

            future: Vec::new(),
            actions: Vec::new(),
            metrics,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn tip(&self) -> &Tip {
        self.finalizer.tip()
    }

    /// When [State::timeout] should next be called.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[cfg(test)]
    pub fn namespaces(&self) -> &Namespaces {
        &self.rules.namespaces
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    /// Committees known to this node (the current epoch and the one before it).
    pub fn committees(&self) -> BTreeMap<Epoch, Arc<Committee>> {
        self.committees.clone()
    }

    fn epoch(&self, height: Height) -> Epoch {
        epoch(height, self.epoch_length)
    }

    fn committee_for(&self, height: Height) -> Option<Arc<Committee>> {
        self.committees.get(&self.epoch(height)).cloned()
    }

    /// Crosslink signatures below this slot are forgotten.
    fn crosslink_floor(&self) -> Height {
        (self.finalizer.tip().height + 1).saturating_sub(2 * self.crosslink_interval)
    }

    fn timeout_for(&self, view: View) -> Duration {
        timeout(self.base_timeout, self.max_timeout, view)
    }

    fn drain(&mut self) -> Vec<Action> {
        take(&mut self.actions)
    }

    fn broadcast(&mut self, message: Message) {
        self.actions.push(Action::Broadcast(message));
    }

    fn report(&mut self, activity: Activity) {
        self.actions.push(Action::Report(activity));
    }

    fn evidence(&mut self, validator: ValidatorId, proof: Proof) {
        let evidence = SlashableEvidence { validator, proof };
        warn!(validator, kind = ?evidence.evidence_type(), "detected misbehavior");
        self.metrics.evidence.inc();
        self.report(Activity::Evidence(evidence));
    }

    /// Begin working on the height after the tip.
    pub fn start(&mut self, now: Moment) -> Vec<Action> {
        self.enter_height(now);
        self.drain()
    }

    /// Decide what to do with an unverified message.
    pub fn triage(&self, message: &Message) -> Triage {
        if let Message::Crosslink(vote) = message {
            return self.triage_crosslink(&vote.payload);
        }
        let height = message.height();
        if height < self.round.height || height > self.round.height + 1 {
            return Triage::Drop;
        }
        if self.committees.contains_key(&self.epoch(height)) {
            Triage::Process
        } else {
            Triage::Hold
        }
    }

    /// Crosslink votes are only useful for checkpoints between the prune floor and the next
    /// checkpoint after the tip.
    fn triage_crosslink(&self, payload: &CrosslinkPayload) -> Triage {
        let slot = payload.slot;
        let tip = self.finalizer.tip().height;
        if slot == 0
            || !self.finalizer.is_checkpoint(slot)
            || payload.shard != self.shard
            || payload.epoch != self.epoch(slot)
            || slot < self.crosslink_floor()
            || slot > tip.saturating_add(self.crosslink_interval)
        {
            return Triage::Drop;
        }
        if slot > tip {
            return Triage::Hold;
        }
        if self.committees.contains_key(&payload.epoch) {
            Triage::Process
        } else {
            Triage::Drop
        }
    }

    /// Handle a message whose signatures (other than the proposal's) have been verified.
    pub fn handle(&mut self, message: Message, now: Moment) -> Vec<Action> {
        self.dispatch(message, now);
        self.drain()
    }

    fn dispatch(&mut self, message: Message, now: Moment) {
        let message = match message {
            Message::Crosslink(vote) => return self.on_crosslink(vote),
            message => message,
        };

        // Certificates carried by messages for the next height may finalize the current one
        if message.height() == self.round.height + 1 {
            for qc in certificates(&message) {
                self.on_certificate(qc.clone(), now);
            }
            if message.height() == self.round.height + 1 {
                if self.future.len() < MAX_FUTURE {
                    self.future.push(message);
                }
                return;
            }
        }
        if message.height() != self.round.height {
            return;
        }
        match message {
            Message::Proposal(proposal) => self.on_proposal(proposal, now),
            Message::PreVote(vote) | Message::PreCommit(vote) => self.on_vote(vote, now),
            Message::ViewChange(view_change) => self.on_view_change(view_change, now),
            Message::NewView(new_view) => self.on_new_view(new_view, now),
            Message::Crosslink(_) => {}
        }
    }

    fn replay(&mut self, now: Moment) {
        for message in take(&mut self.future) {
            self.dispatch(message, now);
        }
    }

    fn enter_height(&mut self, now: Moment) {
        let height = self.finalizer.tip().height + 1;
        self.round = Round::new(height, 0);

        // Forget everything about finalized heights
        let floor = Round::new(height, 0);
        self.blocks.prune(height - 1);
        self.votes.prune(height);
        self.view_changes.prune(height);
        self.proposals = self.proposals.split_off(&floor);
        self.prevoted = self.prevoted.split_off(&floor);
        self.precommitted = self.precommitted.split_off(&floor);
        self.certified = self.certified.split_off(&floor);
        self.pending_commits.retain(|_, qc| qc.height() >= height);
        if self.locked.as_ref().is_some_and(|qc| qc.height() < height) {
            self.locked = None;
        }
        self.finalizer.prune(self.crosslink_floor());
        self.metrics.height.set(height as i64);

        let epoch = self.epoch(height);
        if !self.committees.contains_key(&epoch) {
            debug!(height, epoch, "awaiting committee");
            self.status = Status::AwaitingCommittee;
            self.deadline = now.instant + self.seed_retry;
            self.actions.push(Action::FetchCommittee(epoch));
            return;
        }
        self.enter_view(0, None, now);
        self.replay(now);
    }

    fn enter_view(&mut self, view: View, justify: Option<NewView>, now: Moment) {
        self.round.view = view;
        self.justify = justify;
        self.proposed = false;
        self.view_change = None;
        self.attempts = 0;
        self.alerted = false;
        self.deadline = now.instant + self.timeout_for(view);
        self.metrics.view.set(view as i64);

        let Some(committee) = self.committee_for(self.round.height) else {
            self.status = Status::AwaitingCommittee;
            return;
        };
        let leader = match committee.leader(self.round) {
            Ok(leader) => leader,
            Err(err) => {
                error!(?err, round = %self.round, "unable to elect leader");
                self.status = Status::AwaitingCommittee;
                return;
            }
        };
        debug!(round = %self.round, leader, "entered view");
        if leader == self.id {
            self.status = Status::Proposing;
            self.propose(now);
        } else {
            self.status = Status::Voting;
        }

        // A proposal may have arrived before we entered the view
        if let Some(proposal) = self.proposals.remove(&self.round) {
            self.on_proposal(proposal, now);
        }
    }

    fn propose(&mut self, now: Moment) {
        if self.proposed {
            return;
        }
        self.proposed = true;

        // Re-propose the block certified at this height, if the justification carries one
        let certified = self
            .justify
            .as_ref()
            .and_then(|new_view| new_view.high_qc.as_ref())
            .filter(|qc| qc.height() == self.round.height)
            .map(|qc| qc.block);
        let Some(digest) = certified else {
            let context = Context {
                shard: self.shard,
                round: self.round,
                parent: *self.finalizer.tip(),
                proposer: self.id,
            };
            self.actions.push(Action::Propose(context));
            return;
        };
        let Some(block) = self.blocks.get(&digest).cloned() else {
            debug!(round = %self.round, ?digest, "missing certified block, skipping proposal");
            return;
        };
        let proposal = Proposal::sign(
            &self.rules.namespaces,
            &self.signer,
            block,
            self.round.view,
            self.justify.clone(),
            self.finalizer.certificate().cloned(),
        );
        debug!(round = %self.round, ?digest, "re-proposing certified block");
        self.broadcast(Message::Proposal(proposal.clone()));
        self.proposals.insert(self.round, proposal);
        self.on_verified(self.round, digest, true, now);
    }

    /// Handle a payload built by execution for `context`.
    pub fn proposed(&mut self, context: Context, payload: Payload, now: Moment) -> Vec<Action> {
        if context.round != self.round || self.status != Status::Proposing {
            debug!(round = %context.round, current = %self.round, "dropping stale payload");
            return self.drain();
        }
        let tip = *self.finalizer.tip();
        let header = Header {
            shard: self.shard,
            height: self.round.height,
            view: self.round.view,
            parent: tip.digest,
            proposer: self.id,
            timestamp: now.millis.max(tip.timestamp),
            state_root: payload.state_root,
            tx_root: payload.body.root(),
        };
        let block = Block::sign(&self.rules.namespaces, &self.signer, header, payload.body);
        if block.encode_size() > self.rules.max_block_size {
            warn!(round = %self.round, size = block.encode_size(), "payload exceeds block size");
            return self.drain();
        }
        let digest = block.digest();
        let proposal = Proposal::sign(
            &self.rules.namespaces,
            &self.signer,
            block,
            self.round.view,
            self.justify.clone(),
            self.finalizer.certificate().cloned(),
        );
        debug!(round = %self.round, ?digest, "proposing block");
        self.broadcast(Message::Proposal(proposal.clone()));
        self.proposals.insert(self.round, proposal);
        self.on_verified(self.round, digest, true, now);
        self.drain()
    }

    fn on_proposal(&mut self, proposal: Proposal, now: Moment) {
        let round = proposal.round();
        let digest = proposal.block.digest();
        let Some(committee) = self.committee_for(round.height) else {
            return;
        };

        // The justification lets a lagging node join the proposed view
        if let Some(new_view) = proposal.justify.clone() {
            if new_view.round() == round && round.view > self.round.view {
                self.on_new_view(new_view, now);
            }
        }

        // Only the first signed proposal per round is considered
        if let Some(existing) = self.proposals.get(&round) {
            if existing.block.digest() != digest {
                if let Some(leader) = self.rules.signer(&committee, &proposal) {
                    let proof =
                        Proof::ConflictingProposals(Box::new(existing.clone()), Box::new(proposal));
                    self.evidence(leader, proof);
                }
            }
            return;
        }

        // A block we already know is final is accepted regardless of view
        let committing = self.pending_commits.contains_key(&digest);
        if !committing {
            if round.view < self.round.view || round.view > self.round.view + VIEW_LOOKAHEAD {
                return;
            }
            if round.view > self.round.view || self.status == Status::ViewChanging {
                if self.rules.signer(&committee, &proposal).is_some() {
                    self.proposals.insert(round, proposal);
                }
                return;
            }
        }

        let locked = if committing { None } else { self.locked.as_ref() };
        let result = self.rules.validate(
            &committee,
            self.finalizer.tip(),
            locked,
            &proposal,
            now.millis,
        );
        if let Err(err) = result {
            debug!(round = %round, ?digest, %err, "rejected proposal");
            self.metrics.invalid.inc();
            if let Some(leader) = self.rules.signer(&committee, &proposal) {
                if matches!(err, BlockError::Structural(_)) {
                    let block = Box::new(proposal.block.clone());
                    self.evidence(leader, Proof::InvalidProposal(block));
                }
                self.proposals.insert(round, proposal);
            }
            return;
        }
        debug!(round = %round, ?digest, "proposal passed validation");
        let context = Context {
            shard: self.shard,
            round,
            parent: *self.finalizer.tip(),
            proposer: proposal.block.header().proposer,
        };
        let block = proposal.block.clone();
        self.proposals.insert(round, proposal);
        self.actions.push(Action::Verify(context, block));
    }

    /// Handle the execution verdict for the block proposed in `round`.
    pub fn verified(
        &mut self,
        round: Round,
        digest: Digest,
        valid: bool,
        now: Moment,
    ) -> Vec<Action> {
        self.on_verified(round, digest, valid, now);
        self.drain()
    }

    fn on_verified(&mut self, round: Round, digest: Digest, valid: bool, now: Moment) {
        if round.height != self.round.height {
            return;
        }
        let Some(proposal) = self.proposals.get(&round) else {
            return;
        };
        if proposal.block.digest() != digest {
            return;
        }
        if !valid {
            debug!(round = %round, ?digest, err = %BlockError::StateTransition, "rejected proposal");
            self.metrics.invalid.inc();
            return;
        }
        let block = proposal.block.clone();
        self.blocks.insert(block);

        if let Some(qc) = self.pending_commits.remove(&digest) {
            self.finalize(qc, now);
            return;
        }
        if round != self.round
            || matches!(
                self.status,
                Status::ViewChanging | Status::AwaitingCommittee
            )
        {
            return;
        }

        // Proposal received: now wait for votes
        self.deadline = now.instant + self.timeout_for(round.view);
        if self.status == Status::Proposing {
            self.status = Status::Voting;
        }
        self.vote(Phase::PreVote, digest, now);
        self.try_precommit(now);
    }

    fn vote(&mut self, phase: Phase, block: Digest, now: Moment) {
        let round = self.round;
        let cast = match phase {
            Phase::PreVote => &mut self.prevoted,
            Phase::PreCommit => &mut self.precommitted,
        };
        if !cast.insert(round) {
            return;
        }
        let Some(committee) = self.committee_for(round.height) else {
            return;
        };
        if committee.index_of(self.id).is_none() {
            return;
        }
        let vote = Vote::sign(
            &self.rules.namespaces,
            &self.signer,
            self.id,
            self.shard,
            round,
            phase,
            block,
        );
        let message = match phase {
            Phase::PreVote => Message::PreVote(vote.clone()),
            Phase::PreCommit => Message::PreCommit(vote.clone()),
        };
        self.broadcast(message);
        self.on_vote(vote, now);
    }

    fn try_precommit(&mut self, now: Moment) {
        if matches!(
            self.status,
            Status::ViewChanging | Status::AwaitingCommittee
        ) {
            return;
        }
        let Some(qc) = self.certified.get(&self.round).cloned() else {
            return;
        };
        if self.precommitted.contains(&self.round) || !self.blocks.contains(&qc.block) {
            return;
        }
        if self
            .locked
            .as_ref()
            .is_none_or(|locked| qc.rank() > locked.rank())
        {
            self.locked = Some(qc.clone());
        }
        self.status = Status::Committing;
        self.vote(Phase::PreCommit, qc.block, now);
    }

    fn on_vote(&mut self, vote: Vote, now: Moment) {
        if vote.view() > self.round.view + VIEW_LOOKAHEAD {
            return;
        }
        let Some(committee) = self.committee_for(vote.height()) else {
            return;
        };
        match self.votes.add(&committee, vote.clone()) {
            Ok(Added::Equivocation(previous)) => {
                self.evidence(vote.voter, Proof::ConflictingVotes(previous, vote));
            }
            Ok(Added::Certified(qc)) => {
                debug!(round = %qc.round, phase = ?qc.phase, block = ?qc.block, "formed certificate");
                self.on_certificate(qc, now);
            }
            Ok(Added::Counted | Added::Ignored) => {}
            Err(err) => warn!(?err, "failed to aggregate votes"),
        }
    }

    fn on_certificate(&mut self, qc: QuorumCertificate, now: Moment) {
        self.high_qc = highest(self.high_qc.take(), Some(qc.clone()));
        if qc.height() != self.round.height {
            return;
        }
        match qc.phase {
            Phase::PreCommit => {
                if self.blocks.contains(&qc.block) {
                    self.finalize(qc, now);
                } else {
                    self.pending_commits.entry(qc.block).or_insert(qc);
                }
            }
            Phase::PreVote => {
                if self.certified.contains_key(&qc.round) {
                    return;
                }
                let round = qc.round;
                self.certified.insert(round, qc);
                if round == self.round
                    && matches!(self.status, Status::Voting | Status::Proposing)
                {
                    // Quorum reached: restart the deadline for the commit phase
                    self.deadline = now.instant + self.timeout_for(round.view);
                }
                self.try_precommit(now);
            }
        }
    }

    fn finalize(&mut self, qc: QuorumCertificate, now: Moment) {
        let Some(block) = self.blocks.get(&qc.block).cloned() else {
            return;
        };
        let epoch = self.epoch(block.height());
        let view = qc.view();
        let Some(finalized) = self.finalizer.finalize(&block, qc, epoch) else {
            return;
        };
        info!(
            height = finalized.event.height,
            view,
            digest = ?finalized.event.block_hash,
            "finalized block"
        );
        self.metrics.finalized.inc();
        self.report(Activity::Finalized(finalized.event));
        if let Some(payload) = finalized.checkpoint {
            let member = self
                .committees
                .get(&payload.epoch)
                .is_some_and(|committee| committee.index_of(self.id).is_some());
            if member {
                self.actions.push(Action::Link(payload));
            }
        }
        self.enter_height(now);
    }

    /// Sign the checkpoint `payload` on top of `latest`, the newest crosslink the beacon chain has
    /// accepted for this shard. A rejected checkpoint is therefore never a parent.
    pub fn linked(
        &mut self,
        mut payload: CrosslinkPayload,
        latest: Option<CrosslinkPayload>,
    ) -> Vec<Action> {
        if let Some(latest) = &latest {
            if latest.slot >= payload.slot {
                debug!(slot = payload.slot, latest = latest.slot, "checkpoint already superseded");
                return self.drain();
            }
        }
        payload.parent = latest.map_or(Digest::ZERO, |latest| latest.root());
        let vote = CrosslinkVote::sign(&self.rules.namespaces, &self.signer, self.id, payload);
        self.broadcast(Message::Crosslink(vote.clone()));
        self.on_crosslink(vote);
        self.drain()
    }

    fn on_crosslink(&mut self, vote: CrosslinkVote) {
        match self.triage_crosslink(&vote.payload) {
            Triage::Process => {}
            Triage::Hold => {
                // Signed by a peer that finalized the checkpoint first
                if self.future.len() < MAX_FUTURE {
                    self.future.push(Message::Crosslink(vote));
                }
                return;
            }
            Triage::Drop => return,
        }
        let Some(committee) = self.committees.get(&vote.payload.epoch).cloned() else {
            return;
        };
        let Ok(submitter) = committee.leader(Round::new(vote.payload.slot, 0)) else {
            return;
        };
        match self.finalizer.add_vote(&committee, vote) {
            Ok(Collected::Assembled(crosslink)) if submitter == self.id => {
                info!(
                    slot = crosslink.payload.slot,
                    epoch = crosslink.payload.epoch,
                    "submitting crosslink"
                );
                self.metrics.crosslinks_submitted.inc();
                self.actions.push(Action::Submit(crosslink));
            }
            Ok(Collected::Conflict(previous, vote)) => {
                self.evidence(vote.validator, Proof::ConflictingCrosslinks(previous, vote));
            }
            Ok(Collected::Assembled(_) | Collected::Pending) => {}
            Err(err) => warn!(?err, "failed to aggregate crosslink"),
        }
    }

    /// Handle the beacon chain's response to a submitted crosslink.
    ///
    /// A rejected crosslink is not resubmitted: the next checkpoint supersedes it.
    pub fn crosslink_result(
        &mut self,
        crosslink: &Crosslink,
        result: Result<(), Rejection>,
    ) -> Vec<Action> {
        let slot = crosslink.payload.slot;
        match result {
            Ok(()) => debug!(slot, "crosslink accepted"),
            Err(reason) => {
                warn!(slot, %reason, "crosslink rejected");
                self.metrics.crosslinks_rejected.inc();
                self.report(Activity::Alert(Alert::CrosslinkRejected {
                    slot,
                    reason: reason.to_string(),
                }));
            }
        }
        self.drain()
    }

    fn on_view_change(&mut self, view_change: ViewChange, now: Moment) {
        if let Some(qc) = view_change.last_known_qc.clone() {
            self.on_certificate(qc, now);
        }
        if view_change.height != self.round.height
            || view_change.new_view <= self.round.view
            || view_change.new_view > self.round.view + VIEW_LOOKAHEAD
        {
            return;
        }
        let Some(committee) = self.committee_for(view_change.height) else {
            return;
        };
        match self.view_changes.add(&committee, view_change) {
            Ok(Some(new_view)) => self.assembled(new_view, now),
            Ok(None) => {}
            Err(err) => warn!(?err, "failed to aggregate view change"),
        }
    }

    fn assembled(&mut self, new_view: NewView, now: Moment) {
        debug!(round = %new_view.round(), "assembled new view");
        self.broadcast(Message::NewView(new_view.clone()));
        self.on_new_view(new_view, now);
    }

    fn on_new_view(&mut self, new_view: NewView, now: Moment) {
        if let Some(qc) = new_view.high_qc.clone() {
            self.on_certificate(qc, now);
        }
        if new_view.height != self.round.height || new_view.view <= self.round.view {
            return;
        }
        info!(height = new_view.height, view = new_view.view, "moving to new view");
        self.view_changes.settle(new_view.round());
        let view = new_view.view;
        self.enter_view(view, Some(new_view), now);
    }

    /// Handle the deadline returned by [State::deadline] firing.
    pub fn timeout(&mut self, now: Moment) -> Vec<Action> {
        if now.instant < self.deadline {
            return self.drain();
        }
        match self.status {
            Status::AwaitingCommittee => {
                let epoch = self.epoch(self.round.height);
                self.deadline = now.instant + self.seed_retry;
                self.actions.push(Action::FetchCommittee(epoch));
            }
            Status::ViewChanging => {
                self.deadline = now.instant + self.view_change_retry;
                let Some(view_change) = self.view_change.clone() else {
                    return self.drain();
                };
                self.broadcast(Message::ViewChange(view_change));
                self.attempts += 1;
                if self.attempts >= self.stall_threshold && !self.alerted {
                    self.alerted = true;
                    let target = Round::new(self.round.height, self.round.view + 1);
                    warn!(
                        round = %self.round,
                        attempts = self.attempts,
                        collected = self.view_changes.count(target),
                        "view change not reaching quorum"
                    );
                    self.metrics.stalls.inc();
                    self.report(Activity::Alert(Alert::Liveness {
                        height: self.round.height,
                        view: self.round.view + 1,
                        attempts: self.attempts,
                    }));
                }
            }
            Status::Proposing | Status::Voting | Status::Committing => {
                info!(round = %self.round, "round timed out, requesting view change");
                self.status = Status::ViewChanging;
                self.metrics.view_changes.inc();
                self.deadline = now.instant + self.view_change_retry;
                self.attempts = 0;
                self.alerted = false;
                if let Some(committee) = self.committee_for(self.round.height) {
                    if committee.index_of(self.id).is_some() {
                        self.request_view_change(&committee, now);
                    }
                }
            }
        }
        self.drain()
    }

    fn request_view_change(&mut self, committee: &Committee, now: Moment) {
        let view_change = ViewChange::sign(
            &self.rules.namespaces,
            &self.signer,
            self.id,
            self.shard,
            self.round.height,
            self.round.view + 1,
            self.high_qc.clone(),
        );
        self.view_change = Some(view_change.clone());
        self.broadcast(Message::ViewChange(view_change.clone()));
        match self.view_changes.add(committee, view_change) {
            Ok(Some(new_view)) => self.assembled(new_view, now),
            Ok(None) => {}
            Err(err) => warn!(?err, "failed to aggregate view change"),
        }
    }

    /// Install the committee for `epoch` from the beacon seed and registry.
    ///
    /// Without a seed the shard stays halted; no fallback committee is derived.
    pub fn epoch_ready(
        &mut self,
        epoch: Epoch,
        seed: Option<Seed>,
        validators: Vec<Validator>,
        now: Moment,
    ) -> Vec<Action> {
        if self.status != Status::AwaitingCommittee || epoch != self.epoch(self.round.height) {
            return self.drain();
        }
        self.deadline = now.instant + self.seed_retry;
        let Some(seed) = seed else {
            if self.halted != Some(epoch) {
                self.halted = Some(epoch);
                error!(epoch, "seed unavailable, shard halted");
                self.report(Activity::Alert(Alert::SeedUnavailable { epoch }));
            }
            return self.drain();
        };
        let shard = self.shard as usize;
        let committee = select_committee(
            &validators,
            self.shard_count,
            epoch,
            &seed,
            self.min_committee_size,
        )
        .and_then(|committees| {
            committees
                .into_iter()
                .nth(shard)
                .ok_or(Error::MissingShard(epoch))
        })
        .and_then(|committee| {
            // Larger committees produce certificates peers refuse to decode
            let size = committee.size() as usize;
            if size > self.max_committee_size {
                return Err(Error::CommitteeTooLarge {
                    size,
                    max: self.max_committee_size,
                });
            }
            Ok(committee)
        });
        let committee = match committee {
            Ok(committee) => committee,
            Err(err) => {
                if self.halted != Some(epoch) {
                    self.halted = Some(epoch);
                    error!(epoch, %err, "committee unavailable, shard halted");
                    self.report(Activity::Alert(Alert::CommitteeUnavailable {
                        epoch,
                        reason: err.to_string(),
                    }));
                }
                return self.drain();
            }
        };
        info!(
            epoch,
            size = committee.size(),
            member = committee.index_of(self.id).is_some(),
            "installed committee"
        );
        self.halted = None;
        self.committees.insert(epoch, Arc::new(committee));
        self.committees = self.committees.split_off(&epoch.saturating_sub(1));
        self.enter_view(0, None, now);
        self.replay(now);
        self.drain()
    }
}

/// Certificates carried by `message`.
fn certificates(message: &Message) -> Vec<&QuorumCertificate> {
    match message {
        Message::Proposal(proposal) => proposal
            .parent
            .iter()
            .chain(proposal.justify.iter().filter_map(|nv| nv.high_qc.as_ref()))
            .collect(),
        Message::ViewChange(view_change) => view_change.last_known_qc.iter().collect(),
        Message::NewView(new_view) => new_view.high_qc.iter().collect(),
        Message::PreVote(_) | Message::PreCommit(_) | Message::Crosslink(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::types::{Body, EvidenceType};
    use bytes::Bytes;
    use shardline_cryptography::{bls12381::aggregate_signatures, hash};
    use shardline_utils::BitVec;
    use std::collections::VecDeque;

    const SHARD: ShardId = 0;
    const NAMESPACE: &[u8] = b"_SHARDLINE";

    fn signers(n: u64) -> Vec<PrivateKey> {
        (0..n).map(PrivateKey::from_seed).collect()
    }

    fn validators(signers: &[PrivateKey]) -> Vec<Validator> {
        signers
            .iter()
            .enumerate()
            .map(|(id, signer)| Validator {
                id: id as u64,
                public_key: signer.public_key(),
                stake: 100,
                active: 0..u64::MAX,
            })
            .collect()
    }

    fn config(signer: PrivateKey, id: ValidatorId) -> Config {
        Config {
            signer,
            id,
            namespaces: Namespaces::new(NAMESPACE),
            shard: SHARD,
            shard_count: 1,
            min_committee_size: 4,
            epoch_length: 1_000,
            base_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(8),
            view_change_retry: Duration::from_millis(500),
            stall_threshold: 3,
            seed_retry: Duration::from_secs(1),
            max_block_size: 1024 * 1024,
            max_clock_skew: Duration::from_secs(1),
            max_committee_size: 1_024,
            crosslink_interval: 4,
        }
    }

    fn tip(height: Height) -> Tip {
        Tip {
            height,
            digest: hash(b"tip"),
            timestamp: 999_000,
            state_root: hash(b"state"),
        }
    }

    /// Routes actions between in-process state machines until the queue is empty.
    struct Network {
        nodes: Vec<State>,
        online: Vec<bool>,
        validators: Vec<Validator>,
        seed: Option<Seed>,
        /// Execution refuses to build blocks above this height.
        limit: Height,
        start: Instant,
        elapsed: Duration,
        activity: Vec<Vec<Activity>>,
        sent: Vec<usize>,
        submitted: Vec<Crosslink>,
        accepted: Vec<Crosslink>,
        /// Slots the beacon chain refuses.
        rejections: BTreeMap<Height, Rejection>,
        queue: VecDeque<(usize, Action)>,
    }

    impl Network {
        fn new(n: u64, tip: Tip, limit: Height) -> Self {
            let signers = signers(n);
            let validators = validators(&signers);
            let start = Instant::now();
            let now = Moment {
                instant: start,
                millis: 1_000_000,
            };
            let nodes = signers
                .into_iter()
                .enumerate()
                .map(|(id, signer)| {
                    State::new(config(signer, id as u64), tip, Metrics::default(), now)
                })
                .collect();
            Self {
                nodes,
                online: vec![true; n as usize],
                validators,
                seed: Some(hash(b"epoch-seed")),
                limit,
                start,
                elapsed: Duration::ZERO,
                activity: vec![Vec::new(); n as usize],
                sent: vec![0; n as usize],
                submitted: Vec::new(),
                accepted: Vec::new(),
                rejections: BTreeMap::new(),
                queue: VecDeque::new(),
            }
        }

        fn now(&self) -> Moment {
            Moment {
                instant: self.start + self.elapsed,
                millis: 1_000_000 + self.elapsed.as_millis() as u64,
            }
        }

        fn start(&mut self) {
            for node in 0..self.nodes.len() {
                if self.online[node] {
                    let now = self.now();
                    let actions = self.nodes[node].start(now);
                    self.enqueue(node, actions);
                }
            }
            self.run();
        }

        fn enqueue(&mut self, from: usize, actions: Vec<Action>) {
            self.queue
                .extend(actions.into_iter().map(|action| (from, action)));
        }

        fn run(&mut self) {
            while let Some((from, action)) = self.queue.pop_front() {
                let now = self.now();
                match action {
                    Action::Broadcast(message) => {
                        self.sent[from] += 1;
                        for to in 0..self.nodes.len() {
                            if to == from || !self.online[to] {
                                continue;
                            }
                            let actions = self.nodes[to].handle(message.clone(), now);
                            self.enqueue(to, actions);
                        }
                    }
                    Action::Propose(context) => {
                        let height = context.round.height;
                        if height > self.limit {
                            continue;
                        }
                        let payload = Payload {
                            body: Body {
                                transactions: vec![Bytes::from(height.to_be_bytes().to_vec())],
                                ..Body::default()
                            },
                            state_root: hash(&height.to_be_bytes()),
                        };
                        let actions = self.nodes[from].proposed(context, payload, now);
                        self.enqueue(from, actions);
                    }
                    Action::Verify(context, block) => {
                        let actions =
                            self.nodes[from].verified(context.round, block.digest(), true, now);
                        self.enqueue(from, actions);
                    }
                    Action::Report(activity) => self.activity[from].push(activity),
                    Action::Link(payload) => {
                        let latest = self.accepted.last().map(|crosslink| crosslink.payload.clone());
                        let actions = self.nodes[from].linked(payload, latest);
                        self.enqueue(from, actions);
                    }
                    Action::Submit(crosslink) => {
                        self.submitted.push(crosslink.clone());
                        let result = match self.rejections.get(&crosslink.payload.slot) {
                            Some(reason) => Err(reason.clone()),
                            None => {
                                self.accepted.push(crosslink.clone());
                                Ok(())
                            }
                        };
                        let actions = self.nodes[from].crosslink_result(&crosslink, result);
                        self.enqueue(from, actions);
                    }
                    Action::FetchCommittee(epoch) => {
                        let actions = self.nodes[from].epoch_ready(
                            epoch,
                            self.seed,
                            self.validators.clone(),
                            now,
                        );
                        self.enqueue(from, actions);
                    }
                }
            }
        }

        /// Advance time and fire every expired deadline.
        fn advance(&mut self, by: Duration) {
            self.elapsed += by;
            let now = self.now();
            for node in 0..self.nodes.len() {
                if self.online[node] {
                    let actions = self.nodes[node].timeout(now);
                    self.enqueue(node, actions);
                }
            }
            self.run();
        }

        fn finalized(&self, node: usize) -> Vec<(Height, Digest, View)> {
            self.activity[node]
                .iter()
                .filter_map(|activity| match activity {
                    Activity::Finalized(event) => {
                        Some((event.height, event.block_hash, event.qc.view()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn committee(&self) -> Committee {
            select_committee(&self.validators, 1, 0, &self.seed.unwrap(), 4)
                .unwrap()
                .remove(0)
        }
    }

    #[test]
    fn test_four_validators_finalize_height_ten() {
        let mut network = Network::new(4, tip(9), 10);
        network.start();

        // Every node finalizes height 10 exactly once, with the same block, at view 0
        let expected = network.finalized(0);
        assert_eq!(expected.len(), 1);
        assert_eq!(expected[0].0, 10);
        assert_eq!(expected[0].2, 0);
        for node in 1..4 {
            assert_eq!(network.finalized(node), expected);
        }

        // Height advanced and the view reset
        for node in &network.nodes {
            assert_eq!(node.round(), Round::new(11, 0));
            assert_eq!(node.tip().digest, expected[0].1);
        }

        // The block was built by the elected leader and the certificate verifies
        let committee = network.committee();
        let Activity::Finalized(event) = &network.activity[0][0] else {
            panic!("expected finalization");
        };
        assert_eq!(
            event.block.header().proposer,
            committee.leader(Round::new(10, 0)).unwrap()
        );
        assert!(event.qc.verify(network.nodes[0].namespaces(), &committee));
    }

    #[test]
    fn test_silent_proposer_triggers_view_change() {
        let mut network = Network::new(4, tip(19), 20);
        let leader = network.committee().leader(Round::new(20, 0)).unwrap() as usize;
        network.online[leader] = false;
        network.start();
        for node in 0..4 {
            assert!(network.finalized(node).is_empty());
        }

        // The live nodes time out, form a new view and the next leader proposes
        for _ in 0..8 {
            if (0..4)
                .filter(|node| *node != leader)
                .all(|node| !network.finalized(node).is_empty())
            {
                break;
            }
            network.advance(Duration::from_secs(8));
        }
        let expected = network.finalized((leader + 1) % 4);
        assert_eq!(expected.len(), 1);
        let (height, _, view) = expected[0];
        assert_eq!(height, 20);
        assert!(view >= 1);
        for node in (0..4).filter(|node| *node != leader) {
            assert_eq!(network.finalized(node), expected);
        }
    }

    #[test]
    fn test_stalled_view_change_alerts_once() {
        let mut network = Network::new(4, tip(0), 10);
        network.online[2] = false;
        network.online[3] = false;
        network.start();
        network.advance(Duration::from_secs(1));
        for _ in 0..6 {
            network.advance(Duration::from_millis(500));
        }
        for node in 0..2 {
            let alerts = network.activity[node]
                .iter()
                .filter(|activity| matches!(activity, Activity::Alert(Alert::Liveness { .. })))
                .count();
            assert_eq!(alerts, 1);
            assert_eq!(network.nodes[node].status(), Status::ViewChanging);
            assert_eq!(network.nodes[node].round(), Round::new(1, 0));
        }
    }

    #[test]
    fn test_seed_unavailable_halts() {
        let mut network = Network::new(4, tip(0), 1);
        network.seed = None;
        network.start();
        for node in 0..4 {
            assert_eq!(network.nodes[node].status(), Status::AwaitingCommittee);
            assert_eq!(
                network.activity[node],
                vec![Activity::Alert(Alert::SeedUnavailable { epoch: 0 })]
            );
        }

        // Retrying without a seed does not repeat the alert
        network.advance(Duration::from_secs(1));
        assert_eq!(network.activity[0].len(), 1);
        assert!(network.sent.iter().all(|sent| *sent == 0));

        // Once the seed is revealed the shard resumes
        network.seed = Some(hash(b"late"));
        network.advance(Duration::from_secs(1));
        assert_eq!(network.finalized(0).len(), 1);
    }

    #[test]
    fn test_crosslink_every_interval() {
        let mut network = Network::new(4, tip(0), 8);
        network.start();
        assert_eq!(network.finalized(0).len(), 8);

        let slots: Vec<_> = network
            .submitted
            .iter()
            .map(|crosslink| crosslink.payload.slot)
            .collect();
        assert_eq!(slots, vec![4, 8]);
        let committee = network.committee();
        let namespaces = network.nodes[0].namespaces();
        assert!(network.submitted[0].verify(namespaces, &committee));
        assert!(network.submitted[1].verify(namespaces, &committee));
        assert_eq!(network.submitted[0].payload.parent, Digest::ZERO);
        assert_eq!(
            network.submitted[1].payload.parent,
            network.submitted[0].payload.root()
        );
    }

    #[test]
    fn test_observer_follows_without_signing() {
        let mut network = Network::new(5, tip(9), 10);
        network.validators.truncate(4);
        network.start();
        assert_eq!(network.finalized(4), network.finalized(0));
        assert_eq!(network.finalized(4).len(), 1);
        assert_eq!(network.sent[4], 0);
    }

    #[test]
    fn test_equivocating_vote_reported() {
        let mut network = Network::new(4, tip(9), 10);
        network.online = vec![true, false, false, false];
        network.start();
        let signers = signers(4);
        let namespaces = Namespaces::new(NAMESPACE);
        let round = network.nodes[0].round();
        let first = Vote::sign(
            &namespaces,
            &signers[1],
            1,
            SHARD,
            round,
            Phase::PreVote,
            hash(b"a"),
        );
        let second = Vote::sign(
            &namespaces,
            &signers[1],
            1,
            SHARD,
            round,
            Phase::PreVote,
            hash(b"b"),
        );
        let now = network.now();
        network.nodes[0].handle(Message::PreVote(first), now);
        let actions = network.nodes[0].handle(Message::PreVote(second), now);
        let evidence: Vec<_> = actions
            .iter()
            .filter_map(|action| match action {
                Action::Report(Activity::Evidence(evidence)) => Some(evidence),
                _ => None,
            })
            .collect();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].validator, 1);
        assert_eq!(evidence[0].evidence_type(), EvidenceType::EquivocatingVote);
    }

    fn evidence(actions: &[Action]) -> Vec<SlashableEvidence> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Report(Activity::Evidence(evidence)) => Some(evidence.clone()),
                _ => None,
            })
            .collect()
    }

    /// A proposal for the current round of `network`, signed by its leader.
    fn proposal(network: &Network, transactions: &[&'static [u8]], tweak: fn(&mut Header)) -> Proposal {
        let namespaces = Namespaces::new(NAMESPACE);
        let signers = signers(network.nodes.len() as u64);
        let round = network.nodes[0].round();
        let leader = network.committee().leader(round).unwrap();
        let body = Body {
            transactions: transactions.iter().copied().map(Bytes::from_static).collect(),
            ..Body::default()
        };
        let mut header = Header {
            shard: SHARD,
            height: round.height,
            view: round.view,
            parent: network.nodes[0].tip().digest,
            proposer: leader,
            timestamp: network.now().millis,
            state_root: hash(b"next"),
            tx_root: body.root(),
        };
        tweak(&mut header);
        let signer = &signers[leader as usize];
        let block = Block::sign(&namespaces, signer, header, body);
        Proposal::sign(&namespaces, signer, block, round.view, None, None)
    }

    #[test]
    fn test_conflicting_proposals_reported() {
        let mut network = Network::new(4, tip(9), 9);
        network.start();
        let leader = network.committee().leader(Round::new(10, 0)).unwrap();
        let node = (leader as usize + 1) % 4;
        let first = proposal(&network, &[b"a"], |_| {});
        let second = proposal(&network, &[b"b"], |_| {});
        let now = network.now();

        let actions = network.nodes[node].handle(Message::Proposal(first.clone()), now);
        assert!(actions
            .iter()
            .any(|action| matches!(action, Action::Verify(..))));
        assert!(evidence(&actions).is_empty());

        let actions = network.nodes[node].handle(Message::Proposal(second.clone()), now);
        assert_eq!(
            evidence(&actions),
            vec![SlashableEvidence {
                validator: leader,
                proof: Proof::ConflictingProposals(Box::new(first.clone()), Box::new(second)),
            }]
        );

        // Receiving the first proposal again is not misbehavior
        let actions = network.nodes[node].handle(Message::Proposal(first), now);
        assert!(evidence(&actions).is_empty());
    }

    #[test]
    fn test_invalid_proposal_reported() {
        let mut network = Network::new(4, tip(9), 9);
        network.start();
        let leader = network.committee().leader(Round::new(10, 0)).unwrap();
        let node = (leader as usize + 1) % 4;
        let invalid = proposal(&network, &[b"a"], |header| header.tx_root = hash(b"bogus"));
        let now = network.now();
        let actions = network.nodes[node].handle(Message::Proposal(invalid.clone()), now);
        assert!(!actions
            .iter()
            .any(|action| matches!(action, Action::Verify(..))));
        let reported = evidence(&actions);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].validator, leader);
        assert_eq!(reported[0].evidence_type(), EvidenceType::InvalidProposal);
        assert_eq!(reported[0].proof, Proof::InvalidProposal(Box::new(invalid.block)));

        // Never pre-voted
        assert!(!network.nodes[node].prevoted.contains(&Round::new(10, 0)));
    }

    #[test]
    fn test_rejected_crosslink_is_not_a_parent() {
        let mut network = Network::new(4, tip(0), 12);
        network.rejections.insert(4, Rejection::Stale);
        network.start();
        assert_eq!(network.finalized(0).len(), 12);

        let submitted: Vec<_> = network
            .submitted
            .iter()
            .map(|crosslink| crosslink.payload.slot)
            .collect();
        assert_eq!(submitted, vec![4, 8, 12]);

        // Checkpoint 8 chains to nothing, checkpoint 12 to checkpoint 8
        let accepted = &network.accepted;
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].payload.slot, 8);
        assert_eq!(accepted[0].payload.parent, Digest::ZERO);
        assert_eq!(accepted[1].payload.parent, accepted[0].payload.root());

        // Only the submitter of checkpoint 4 learns of the rejection
        let submitter = network.committee().leader(Round::new(4, 0)).unwrap() as usize;
        for node in 0..4 {
            let alerts: Vec<_> = network.activity[node]
                .iter()
                .filter_map(|activity| match activity {
                    Activity::Alert(alert) => Some(alert.clone()),
                    _ => None,
                })
                .collect();
            if node == submitter {
                assert_eq!(
                    alerts,
                    vec![Alert::CrosslinkRejected {
                        slot: 4,
                        reason: "stale checkpoint".to_string(),
                    }]
                );
            } else {
                assert!(alerts.is_empty());
            }
        }
    }

    fn crosslink_vote(signer: &PrivateKey, id: ValidatorId, slot: Height, state: &[u8]) -> Message {
        Message::Crosslink(CrosslinkVote::sign(
            &Namespaces::new(NAMESPACE),
            signer,
            id,
            CrosslinkPayload {
                shard: SHARD,
                epoch: epoch(slot, 1_000),
                block_root: hash(&slot.to_be_bytes()),
                state_root: hash(state),
                parent: Digest::ZERO,
                slot,
            },
        ))
    }

    #[test]
    fn test_crosslink_votes_bounded() {
        let mut network = Network::new(4, tip(0), 8);
        network.start();
        let signers = signers(4);
        let vote = |slot| crosslink_vote(&signers[1], 1, slot, b"state");
        let node = &network.nodes[0];
        assert_eq!(node.tip().height, 8);
        assert_eq!(node.finalizer.slots(), 2);

        // Only checkpoints up to the next one after the tip are kept
        assert_eq!(node.triage(&vote(4)), Triage::Process);
        assert_eq!(node.triage(&vote(8)), Triage::Process);
        assert_eq!(node.triage(&vote(12)), Triage::Hold);
        assert_eq!(node.triage(&vote(6)), Triage::Drop);
        assert_eq!(node.triage(&vote(16)), Triage::Drop);
        assert_eq!(node.triage(&vote(0)), Triage::Drop);
        assert_eq!(node.triage(&vote(u64::MAX - 3)), Triage::Drop);

        // Payloads claiming the wrong epoch or shard are dropped
        let Message::Crosslink(mut wrong) = vote(8) else {
            unreachable!();
        };
        wrong.payload.epoch = 1;
        assert_eq!(node.triage(&Message::Crosslink(wrong.clone())), Triage::Drop);
        wrong.payload.epoch = 0;
        wrong.payload.shard = SHARD + 1;
        assert_eq!(node.triage(&Message::Crosslink(wrong)), Triage::Drop);

        // Far-future slots never reach the finalizer
        let now = network.now();
        let held = network.nodes[0].future.len();
        for i in 0..1_000u64 {
            let actions = network.nodes[0].handle(vote(u64::MAX - 3 - 4 * i), now);
            assert!(actions.is_empty());
        }
        assert_eq!(network.nodes[0].finalizer.slots(), 2);
        assert_eq!(network.nodes[0].future.len(), held);
    }

    #[test]
    fn test_crosslink_equivocation_reported() {
        let mut network = Network::new(4, tip(0), 8);
        network.start();
        let signers = signers(4);
        let now = network.now();

        // Validator 1 already signed checkpoint 8; a second payload is evidence
        let conflicting = crosslink_vote(&signers[1], 1, 8, b"other");
        let actions = network.nodes[0].handle(conflicting, now);
        let reported = evidence(&actions);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].validator, 1);
        assert_eq!(reported[0].evidence_type(), EvidenceType::EquivocatingCrosslink);

        // Repeating the conflicting vote reports it again, but never stores it
        let conflicting = crosslink_vote(&signers[1], 1, 8, b"another");
        let actions = network.nodes[0].handle(conflicting, now);
        let Proof::ConflictingCrosslinks(previous, _) = &evidence(&actions)[0].proof else {
            panic!("expected crosslink evidence");
        };
        assert_eq!(previous.payload, network.accepted[1].payload);
    }

    #[test]
    fn test_oversized_committee_halts() {
        let mut network = Network::new(4, tip(0), 1);
        for node in &mut network.nodes {
            node.max_committee_size = 3;
        }
        network.start();
        for node in 0..4 {
            assert_eq!(network.nodes[node].status(), Status::AwaitingCommittee);
            assert_eq!(
                network.activity[node],
                vec![Activity::Alert(Alert::CommitteeUnavailable {
                    epoch: 0,
                    reason: "committee of 4 exceeds the maximum of 3".to_string(),
                })]
            );
        }
        assert!(network.sent.iter().all(|sent| *sent == 0));

        // Retrying does not repeat the alert
        network.advance(Duration::from_secs(1));
        assert_eq!(network.activity[0].len(), 1);
    }

    #[test]
    fn test_triage_windows() {
        let mut network = Network::new(4, tip(9), 9);
        let namespaces = Namespaces::new(NAMESPACE);
        let signers = signers(4);
        let vote = |height| {
            Message::PreVote(Vote::sign(
                &namespaces,
                &signers[0],
                0,
                SHARD,
                Round::new(height, 0),
                Phase::PreVote,
                hash(b"block"),
            ))
        };

        // Before the committee is known, current messages are held
        assert_eq!(network.nodes[0].triage(&vote(10)), Triage::Hold);
        network.start();
        assert_eq!(network.nodes[0].triage(&vote(9)), Triage::Drop);
        assert_eq!(network.nodes[0].triage(&vote(10)), Triage::Process);
        assert_eq!(network.nodes[0].triage(&vote(11)), Triage::Process);
        assert_eq!(network.nodes[0].triage(&vote(12)), Triage::Drop);
    }

    #[test]
    fn test_quorum_exactness_128() {
        let signers = signers(128);
        let committee = Committee::new(SHARD, 0, hash(b"seed"), validators(&signers)).unwrap();
        assert_eq!(committee.quorum(), 86);
        let namespaces = Namespaces::new(NAMESPACE);
        let round = Round::new(10, 0);
        let block = hash(b"block");
        let votes: Vec<_> = signers
            .iter()
            .enumerate()
            .take(86)
            .map(|(id, signer)| {
                Vote::sign(
                    &namespaces,
                    signer,
                    id as u64,
                    SHARD,
                    round,
                    Phase::PreCommit,
                    block,
                )
            })
            .collect();
        let certificate = |count: usize| {
            let mut signers = BitVec::zeroes(128);
            for index in 0..count {
                signers.set(index);
            }
            QuorumCertificate {
                block,
                round,
                phase: Phase::PreCommit,
                signature: aggregate_signatures(votes.iter().take(count).map(|v| &v.signature))
                    .unwrap(),
                signers,
            }
        };
        assert!(!certificate(85).verify(&namespaces, &committee));
        assert!(certificate(86).verify(&namespaces, &committee));
    }

    #[test]
    fn test_conflicting_quorums_share_a_double_signer() {
        for n in [4u32, 7, 10, 100, 128] {
            let quorum = shardline_utils::quorum(n);
            let overlap = 2 * quorum - n;
            assert!(3 * overlap > n, "n={n} overlap={overlap}");
        }

        let signers = signers(4);
        let committee = Committee::new(SHARD, 0, hash(b"seed"), validators(&signers)).unwrap();
        let namespaces = Namespaces::new(NAMESPACE);
        let round = Round::new(10, 0);
        let mut aggregator = Aggregator::default();
        let mut certificates = Vec::new();
        let mut equivocators = Vec::new();
        for (voter, block) in [(0, b"a"), (1, b"a"), (2, b"a"), (1, b"b"), (2, b"b"), (3, b"b")] {
            let vote = Vote::sign(
                &namespaces,
                &signers[voter],
                voter as u64,
                SHARD,
                round,
                Phase::PreCommit,
                hash(block),
            );
            match aggregator.add(&committee, vote).unwrap() {
                Added::Certified(qc) => certificates.push(qc),
                Added::Equivocation(previous) => equivocators.push(previous.voter),
                Added::Counted | Added::Ignored => {}
            }
        }
        assert_eq!(certificates.len(), 1);
        assert_eq!(certificates[0].block, hash(b"a"));
        assert_eq!(equivocators, vec![1, 2]);
    }

    #[test]
    fn test_deterministic_runs() {
        let run = || {
            let mut network = Network::new(4, tip(9), 12);
            network.start();
            network.finalized(0)
        };
        let first = run();
        assert_eq!(first.len(), 3);
        assert_eq!(first, run());
    }
}
