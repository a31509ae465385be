//! Committee-based BFT consensus for a single shard, checkpointed to a beacon chain.
//!
//! # Overview
//!
//! Every epoch, the validators eligible for that epoch are shuffled with the beacon's random seed
//! and partitioned into one committee per shard ([select_committee]). Within an epoch, each round
//! `(height, view)` has a single proposer drawn from the committee with probability proportional
//! to stake ([select_leader]).
//!
//! A round proceeds in two voting phases:
//!
//! 1. The leader broadcasts a [types::Proposal]. Each member validates the block (structure,
//!    proposer signature, parent continuity, timestamp, then state transition via the
//!    [crate::Execution] collaborator) and broadcasts a `PreVote`. Invalid blocks are silently
//!    ignored: members never vote against a block, they only abstain.
//! 2. Once `2N/3+1` pre-votes for the same block are aggregated into a [types::QuorumCertificate],
//!    members lock on it and broadcast a `PreCommit`.
//!
//! A pre-commit certificate finalizes the block: the height advances and the view resets to zero.
//! Signatures are BLS12-381 and aggregated, so a certificate is verified with one pairing check
//! regardless of committee size.
//!
//! # View Change
//!
//! If a member does not validate a proposal before its round deadline, it broadcasts a
//! [types::ViewChange] carrying the highest certificate it has seen. A quorum of view change
//! messages for the same `(height, new_view)` is aggregated into a [types::NewView], which moves
//! every member to the new view and justifies the next leader's proposal. The deadline starts at
//! `base_timeout` and doubles with every view at the same height (up to `max_timeout`). If a view
//! change cannot gather a quorum after `stall_threshold` rebroadcasts, a liveness alert is
//! reported (and nothing else is done about it).
//!
//! # Safety
//!
//! Any two quorums of the same committee intersect in more than `N/3` members, so two conflicting
//! blocks cannot both be certified in the same round unless more than a third of the committee
//! equivocates. Across views, a member that pre-committed is locked and only pre-votes another
//! block when the proposal is justified by a newer certificate.
//!
//! # Crosslinks
//!
//! Every `crosslink_interval` finalized blocks, each member signs a [types::CrosslinkPayload] for
//! the latest finalized block. The round-zero leader of that height aggregates a quorum of these
//! signatures and submits the [types::Crosslink] to the [crate::BeaconChain].
//!
//! # Misbehavior
//!
//! Conflicting votes, conflicting proposals and correctly signed but malformed blocks are reported
//! as [types::SlashableEvidence] through the [crate::Reporter].

mod aggregator;
mod block;
pub mod committee;
mod config;
mod engine;
mod finalizer;
mod ingress;
pub mod leader;
mod metrics;
mod state;
pub mod types;
mod verifier;
mod view_change;

#[cfg(test)]
pub mod mocks;

use crate::types::{Epoch, ValidatorId};
pub use committee::{select_committee, Committee, Seed, Validator};
pub use config::Config;
pub use engine::Engine;
pub use ingress::{Mailbox, Message, Snapshot};
pub use leader::select_leader;
pub use state::Status;
use thiserror::Error;
pub use view_change::timeout;

/// Errors that can occur while deriving committees and leaders.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("insufficient validators: {available} available, {required} required")]
    InsufficientValidators { available: usize, required: usize },
    #[error("shard count must be greater than zero")]
    NoShards,
    #[error("duplicate validator: {0}")]
    DuplicateValidator(ValidatorId),
    #[error("empty committee")]
    EmptyCommittee,
    #[error("committee has no stake")]
    NoStake,
    #[error("stake overflow")]
    StakeOverflow,
    #[error("no seed available for epoch {0}")]
    SeedUnavailable(Epoch),
    #[error("no committee for shard in epoch {0}")]
    MissingShard(Epoch),
    #[error("committee of {size} exceeds the maximum of {max}")]
    CommitteeTooLarge { size: usize, max: usize },
    #[error("nothing to aggregate")]
    EmptyAggregate,
    #[error("codec error: {0}")]
    Codec(#[from] shardline_codec::Error),
}

/// Reasons a proposed block is rejected, in the order they are checked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("structural: {0}")]
    Structural(&'static str),
    #[error("signature: {0}")]
    Signature(&'static str),
    #[error("parent does not extend the finalized tip")]
    Continuity,
    #[error("timestamp {timestamp} outside [{min}, {max}]")]
    Timestamp { timestamp: u64, min: u64, max: u64 },
    #[error("state transition rejected")]
    StateTransition,
    #[error("locked on a conflicting block")]
    Locked,
    #[error("justification: {0}")]
    Justification(&'static str),
}
