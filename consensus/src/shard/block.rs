//! Block storage and proposal validation.

use super::{
    types::{Block, Namespaces, Phase, Proposal, QuorumCertificate, Tip},
    BlockError, Committee,
};
use crate::types::{Height, Round, ValidatorId};
use shardline_codec::EncodeSize;
use shardline_cryptography::Digest;
use std::{collections::HashMap, time::Duration};

/// Blocks known to this node, addressed by hash.
///
/// Certificates reference blocks by digest, never by pointer, so the store is the only owner.
#[derive(Default)]
pub struct BlockStore {
    blocks: HashMap<Digest, Block>,
}

impl BlockStore {
    pub fn insert(&mut self, block: Block) {
        self.blocks.entry(block.digest()).or_insert(block);
    }

    pub fn get(&self, digest: &Digest) -> Option<&Block> {
        self.blocks.get(digest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blocks.contains_key(digest)
    }

    /// Drop every block at or below `height`.
    pub fn prune(&mut self, height: Height) {
        self.blocks.retain(|_, block| block.height() > height);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// Checks applied to every proposal before it is handed to execution.
pub struct Rules {
    pub namespaces: Namespaces,
    pub max_block_size: usize,
    pub max_clock_skew: Duration,
}

impl Rules {
    /// Validate `proposal` against the finalized `tip`.
    ///
    /// Checks run in a fixed order (structure, signatures, continuity, timestamp, justification,
    /// lock) and the first failure is returned. State transition validity is checked afterwards by
    /// the execution collaborator.
    pub fn validate(
        &self,
        committee: &Committee,
        tip: &Tip,
        locked: Option<&QuorumCertificate>,
        proposal: &Proposal,
        now_ms: u64,
    ) -> Result<(), BlockError> {
        let block = &proposal.block;
        let header = block.header();
        self.structure(committee, tip, proposal)?;

        // The round leader must have signed the proposal
        let leader = committee
            .leader(proposal.round())
            .map_err(|_| BlockError::Signature("no leader"))?;
        let leader_key = committee
            .public_key(leader)
            .ok_or(BlockError::Signature("unknown leader"))?;
        if !proposal.verify(&self.namespaces, leader_key) {
            return Err(BlockError::Signature("proposal not signed by leader"));
        }

        // The block must have been built by the leader of the view it was first proposed in
        let builder = committee
            .leader(Round::new(header.height, header.view))
            .map_err(|_| BlockError::Signature("no leader"))?;
        if header.proposer != builder {
            return Err(BlockError::Signature("proposer was not leader"));
        }
        let builder_key = committee
            .public_key(builder)
            .ok_or(BlockError::Signature("unknown proposer"))?;
        if !block.verify(&self.namespaces, builder_key) {
            return Err(BlockError::Signature("invalid block signature"));
        }

        if header.parent != tip.digest {
            return Err(BlockError::Continuity);
        }

        let max = now_ms.saturating_add(self.max_clock_skew.as_millis() as u64);
        if header.timestamp < tip.timestamp || header.timestamp > max {
            return Err(BlockError::Timestamp {
                timestamp: header.timestamp,
                min: tip.timestamp,
                max,
            });
        }

        let high_qc = self.justification(proposal)?;

        // A locked node only moves to another block on a newer certificate
        if let Some(lock) = locked {
            if lock.height() == header.height && lock.block != block.digest() {
                let unlocked = high_qc.is_some_and(|qc| qc.rank() > lock.rank());
                if !unlocked {
                    return Err(BlockError::Locked);
                }
            }
        }
        Ok(())
    }

    fn structure(
        &self,
        committee: &Committee,
        tip: &Tip,
        proposal: &Proposal,
    ) -> Result<(), BlockError> {
        let block = &proposal.block;
        let header = block.header();
        if header.shard != committee.shard() {
            return Err(BlockError::Structural("wrong shard"));
        }
        if header.height != tip.height + 1 {
            return Err(BlockError::Structural("wrong height"));
        }
        if header.view > proposal.view {
            return Err(BlockError::Structural("block view after proposal view"));
        }
        if block.encode_size() > self.max_block_size {
            return Err(BlockError::Structural("block too large"));
        }
        if committee.index_of(header.proposer).is_none() {
            return Err(BlockError::Structural("proposer not in committee"));
        }
        if header.tx_root != block.body().root() {
            return Err(BlockError::Structural("tx root mismatch"));
        }
        if block
            .body()
            .outgoing
            .iter()
            .any(|msg| msg.source != header.shard)
        {
            return Err(BlockError::Structural("outgoing message from another shard"));
        }
        Ok(())
    }

    /// Check the proposal is justified for its view and return the certificate it carries.
    fn justification<'a>(
        &self,
        proposal: &'a Proposal,
    ) -> Result<Option<&'a QuorumCertificate>, BlockError> {
        let height = proposal.block.height();
        let Some(justify) = &proposal.justify else {
            if proposal.view > 0 {
                return Err(BlockError::Justification("missing new view"));
            }
            return Ok(None);
        };
        if proposal.view == 0 {
            return Err(BlockError::Justification("unexpected new view"));
        }
        if justify.round() != proposal.round() {
            return Err(BlockError::Justification("new view for another round"));
        }
        let high_qc = justify.high_qc.as_ref();
        if let Some(qc) = high_qc {
            // A certified block at this height must be re-proposed
            if qc.height() == height && qc.block != proposal.block.digest() {
                return Err(BlockError::Justification("ignores certified block"));
            }
            if qc.phase == Phase::PreVote && qc.height() > height {
                return Err(BlockError::Justification("certificate from the future"));
            }
        }
        Ok(high_qc)
    }

    /// Returns the leader that signed `proposal` if the signature is valid.
    ///
    /// Used to attribute structurally invalid blocks.
    pub fn signer(&self, committee: &Committee, proposal: &Proposal) -> Option<ValidatorId> {
        let leader = committee.leader(proposal.round()).ok()?;
        let key = committee.public_key(leader)?;
        proposal.verify(&self.namespaces, key).then_some(leader)
    }
}
