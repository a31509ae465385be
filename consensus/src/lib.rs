//! Finalize shard blocks with stake-weighted committees and checkpoint them to a beacon chain.
//!
//! # Status
//!
//! `shardline-consensus` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.
//!
//! The engine in [shard] depends on a handful of collaborators it does not implement: a randomness
//! [Beacon], a validator [Registry], an [Execution] engine, a [Reporter] for finality and misbehavior,
//! the [BeaconChain] that accepts crosslinks, and a gossip transport ([Sender] and [Receiver]).

use bytes::Bytes;
use futures::channel::oneshot;
use shard::{
    types::{Activity, Block, Context, Crosslink, CrosslinkPayload, Payload},
    Seed, Validator,
};
use std::future::Future;
use thiserror::Error;
use types::{Epoch, ShardId};

pub mod shard;
pub mod types;

pub use shard::Error;

/// Beacon is the source of per-epoch randomness.
pub trait Beacon: Clone + Send + 'static {
    /// Returns the seed for `epoch`, or `None` if it has not been revealed yet.
    fn seed(&mut self, epoch: Epoch) -> impl Future<Output = Option<Seed>> + Send;
}

/// Registry publishes the validator set.
pub trait Registry: Clone + Send + 'static {
    /// Returns every known validator. Eligibility for `epoch` is filtered by the caller.
    fn validators(&mut self, epoch: Epoch) -> impl Future<Output = Vec<Validator>> + Send;
}

/// Execution builds and checks the contents of blocks.
pub trait Execution: Clone + Send + 'static {
    /// Build a payload on top of `context.parent`.
    ///
    /// If it is not possible to build a payload, the channel can be dropped.
    fn propose(
        &mut self,
        context: Context,
    ) -> impl Future<Output = oneshot::Receiver<Payload>> + Send;

    /// Apply `block` to the parent state and return whether the transition (and its state root) is
    /// valid.
    ///
    /// If it is not possible to verify the block, the channel can be dropped.
    fn verify(
        &mut self,
        context: Context,
        block: Block,
    ) -> impl Future<Output = oneshot::Receiver<bool>> + Send;
}

/// Reporter receives finalized blocks, slashable evidence and alerts.
pub trait Reporter: Clone + Send + 'static {
    fn report(&mut self, activity: Activity) -> impl Future<Output = ()> + Send;
}

/// Reasons the beacon chain may refuse a crosslink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("invalid aggregate signature")]
    InvalidSignature,
    #[error("stale checkpoint")]
    Stale,
    #[error("unknown shard")]
    UnknownShard,
    #[error("unknown committee")]
    UnknownCommittee,
    #[error("parent is not the latest accepted crosslink")]
    Unlinked,
}

/// BeaconChain accepts crosslinks after verifying them against the committee of their epoch.
///
/// Accepted crosslinks of a shard form a chain: each one names the previously accepted payload
/// as its parent.
pub trait BeaconChain: Clone + Send + 'static {
    /// Returns the latest crosslink accepted for `shard`.
    fn latest(
        &mut self,
        shard: ShardId,
    ) -> impl Future<Output = Option<CrosslinkPayload>> + Send;

    fn submit(
        &mut self,
        crosslink: Crosslink,
    ) -> impl Future<Output = Result<(), Rejection>> + Send;
}

/// Sender broadcasts encoded messages to the other members of the shard.
///
/// Delivery and ordering are best effort.
pub trait Sender: Clone + Send + 'static {
    fn broadcast(&mut self, message: Bytes) -> impl Future<Output = ()> + Send;
}

/// Receiver yields encoded messages from the other members of the shard.
pub trait Receiver: Send + 'static {
    /// Returns the next message, or `None` once the transport is closed.
    ///
    /// Must be cancel-safe.
    fn recv(&mut self) -> impl Future<Output = Option<Bytes>> + Send;
}
