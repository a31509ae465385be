//! Finalized chain tracking and crosslink assembly.

use super::{
    types::{
        aggregate, Block, BlockFinalized, Crosslink, CrosslinkPayload, CrosslinkVote,
        QuorumCertificate, Tip,
    },
    Committee, Error,
};
use crate::types::{Epoch, Height, ShardId};
use shardline_cryptography::Digest;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Output of finalizing a block.
pub struct Finalized {
    pub event: BlockFinalized,
    /// Set when the block is a checkpoint. The payload's `parent` is left zero until it is linked
    /// to the latest crosslink accepted by the beacon chain.
    pub checkpoint: Option<CrosslinkPayload>,
}

/// Result of adding a crosslink signature.
#[derive(Debug, PartialEq, Eq)]
pub enum Collected {
    /// No quorum yet (or the slot was already assembled).
    Pending,
    /// A quorum signed the same payload.
    Assembled(Crosslink),
    /// The signer already signed a different payload for the slot.
    Conflict(CrosslinkVote, CrosslinkVote),
}

#[derive(Default)]
struct Slot {
    /// First vote of each committee index.
    votes: HashMap<u32, CrosslinkVote>,
    assembled: bool,
}

/// Tracks the finalized tip and assembles crosslinks every `interval` blocks.
pub struct Finalizer {
    shard: ShardId,
    interval: u64,
    tip: Tip,
    certificate: Option<QuorumCertificate>,
    slots: BTreeMap<Height, Slot>,
}

impl Finalizer {
    pub fn new(shard: ShardId, interval: u64, tip: Tip) -> Self {
        assert!(interval > 0, "crosslink interval must be greater than zero");
        Self {
            shard,
            interval,
            tip,
            certificate: None,
            slots: BTreeMap::new(),
        }
    }

    pub fn tip(&self) -> &Tip {
        &self.tip
    }

    /// Finality certificate of the tip (absent for the starting tip).
    pub fn certificate(&self) -> Option<&QuorumCertificate> {
        self.certificate.as_ref()
    }

    /// Returns true if `height` is a checkpoint.
    pub fn is_checkpoint(&self, height: Height) -> bool {
        height % self.interval == 0
    }

    /// Append `block` (certified by the finality certificate `qc`) to the chain.
    ///
    /// Returns `None` unless `block` directly extends the tip, so each height is finalized at most
    /// once.
    pub fn finalize(
        &mut self,
        block: &Block,
        qc: QuorumCertificate,
        epoch: Epoch,
    ) -> Option<Finalized> {
        let header = block.header();
        if !qc.is_final() || qc.block != block.digest() {
            return None;
        }
        if header.height != self.tip.height + 1 || header.parent != self.tip.digest {
            debug!(
                height = header.height,
                tip = self.tip.height,
                "ignoring finalization that does not extend tip"
            );
            return None;
        }

        let checkpoint = self.is_checkpoint(header.height).then(|| CrosslinkPayload {
            shard: self.shard,
            epoch,
            block_root: block.digest(),
            state_root: header.state_root,
            parent: Digest::ZERO,
            slot: header.height,
        });
        self.tip = Tip {
            height: header.height,
            digest: block.digest(),
            timestamp: header.timestamp,
            state_root: header.state_root,
        };
        self.certificate = Some(qc.clone());
        Some(Finalized {
            event: BlockFinalized {
                block_hash: block.digest(),
                height: header.height,
                qc,
                block: block.clone(),
            },
            checkpoint,
        })
    }

    /// Add a verified crosslink signature.
    ///
    /// Each committee member counts once per slot. Returns the aggregated [Crosslink] the first
    /// time a quorum signs the same payload for a slot.
    pub fn add_vote(
        &mut self,
        committee: &Committee,
        vote: CrosslinkVote,
    ) -> Result<Collected, Error> {
        let Some(index) = committee.index_of(vote.validator) else {
            return Ok(Collected::Pending);
        };
        let slot = self.slots.entry(vote.payload.slot).or_default();
        let root = vote.payload.root();
        if let Some(previous) = slot.votes.get(&index) {
            if previous.payload.root() != root {
                return Ok(Collected::Conflict(previous.clone(), vote));
            }
            return Ok(Collected::Pending);
        }
        let payload = vote.payload.clone();
        slot.votes.insert(index, vote);
        if slot.assembled {
            return Ok(Collected::Pending);
        }
        let signatures: Vec<_> = slot
            .votes
            .iter()
            .filter(|(_, vote)| vote.payload.root() == root)
            .map(|(index, vote)| (*index, &vote.signature))
            .collect();
        if (signatures.len() as u32) < committee.quorum() {
            return Ok(Collected::Pending);
        }

        let (signature, signers) = aggregate(committee.size(), signatures)?;
        slot.assembled = true;
        Ok(Collected::Assembled(Crosslink {
            payload,
            signature,
            signers,
        }))
    }

    /// Drop crosslink signatures for slots below `slot`.
    pub fn prune(&mut self, slot: Height) {
        self.slots = self.slots.split_off(&slot);
    }

    #[cfg(test)]
    pub fn slots(&self) -> usize {
        self.slots.len()
    }
}
