use super::types::{Limits, Tip};
use crate::{
    types::{ShardId, ValidatorId},
    Beacon, BeaconChain, Execution, Registry, Reporter,
};
use shardline_cryptography::bls12381::PrivateKey;
use std::time::Duration;

/// Configuration for the shard consensus engine.
pub struct Config<B: Beacon, G: Registry, X: Execution, P: Reporter, C: BeaconChain> {
    /// Signing key of this validator.
    pub signer: PrivateKey,

    /// Identifier of this validator in the registry.
    pub id: ValidatorId,

    /// Source of per-epoch seeds.
    pub beacon: B,

    /// Source of the validator set.
    pub registry: G,

    /// Builds and checks block contents.
    pub execution: X,

    /// Receives finalized blocks, evidence and alerts.
    pub reporter: P,

    /// Accepts crosslinks.
    pub beacon_chain: C,

    /// Prefix for all signed messages to prevent replay across deployments.
    pub namespace: Vec<u8>,

    /// Shard this engine participates in.
    pub shard: ShardId,

    /// Number of shards committees are split into.
    pub shard_count: u16,

    /// Minimum committee size. Committee selection fails below it.
    pub min_committee_size: usize,

    /// Number of heights per epoch.
    pub epoch_length: u64,

    /// Last finalized block to build on.
    pub tip: Tip,

    /// Deadline for the first view of a height. Each subsequent view doubles it.
    pub base_timeout: Duration,

    /// Upper bound on the view deadline.
    pub max_timeout: Duration,

    /// Interval between view change rebroadcasts.
    pub view_change_retry: Duration,

    /// Number of unanswered view change rebroadcasts before a liveness alert.
    pub stall_threshold: u32,

    /// Interval between attempts to fetch a missing epoch seed.
    pub seed_retry: Duration,

    /// How far ahead of the local clock a block timestamp may be.
    pub max_clock_skew: Duration,

    /// Maximum encoded size of a block.
    pub max_block_size: usize,

    /// Bounds applied when decoding inbound messages.
    pub limits: Limits,

    /// Number of finalized blocks between crosslinks.
    pub crosslink_interval: u64,

    /// Maximum number of requests to buffer in the mailbox.
    pub mailbox_size: usize,

    /// Number of threads verifying signatures (1 verifies on the engine task).
    pub verification_concurrency: usize,

    /// Maximum number of inbound messages verified together.
    pub verification_batch: usize,
}

impl<B: Beacon, G: Registry, X: Execution, P: Reporter, C: BeaconChain> Config<B, G, X, P, C> {
    /// Assert enforces that all configuration values are valid.
    pub fn assert(&self) {
        assert!(self.shard_count > 0, "shard count must be greater than zero");
        assert!(
            self.shard < self.shard_count,
            "shard must be less than shard count"
        );
        assert!(
            self.min_committee_size > 0,
            "minimum committee size must be greater than zero"
        );
        assert!(
            self.min_committee_size <= self.limits.max_committee_size,
            "minimum committee size must not exceed the maximum committee size"
        );
        assert!(self.epoch_length > 0, "epoch length must be greater than zero");
        assert!(
            self.base_timeout > Duration::default(),
            "base timeout must be greater than zero"
        );
        assert!(
            self.base_timeout <= self.max_timeout,
            "base timeout must be less than or equal to max timeout"
        );
        assert!(
            self.view_change_retry > Duration::default(),
            "view change retry must be greater than zero"
        );
        assert!(
            self.stall_threshold > 0,
            "stall threshold must be greater than zero"
        );
        assert!(
            self.seed_retry > Duration::default(),
            "seed retry must be greater than zero"
        );
        assert!(
            self.max_block_size > 0,
            "it must be possible to build a block"
        );
        assert!(
            self.crosslink_interval > 0,
            "crosslink interval must be greater than zero"
        );
        assert!(self.mailbox_size > 0, "mailbox size must be greater than zero");
        assert!(
            self.verification_concurrency > 0,
            "it must be possible to verify on at least one thread"
        );
        assert!(
            self.verification_batch > 0,
            "it must be possible to verify at least one message at a time"
        );
    }
}
