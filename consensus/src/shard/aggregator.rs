//! Collect votes into quorum certificates.

use super::{
    types::{aggregate, Phase, QuorumCertificate, Vote},
    Committee, Error,
};
use crate::types::{Height, Round};
use shardline_cryptography::Digest;
use std::collections::{BTreeMap, HashMap};

/// Result of adding a vote.
#[derive(Debug, PartialEq, Eq)]
pub enum Added {
    /// The voter is not in the committee or already cast this vote.
    Ignored,
    /// The voter already voted for another block in this round and phase. Contains the earlier
    /// vote; the new one is not counted.
    Equivocation(Vote),
    /// The vote was counted without completing a certificate.
    Counted,
    /// The vote completed a certificate.
    Certified(QuorumCertificate),
}

#[derive(Default)]
struct Tally {
    votes: HashMap<u32, Vote>,
    blocks: HashMap<Digest, Vec<u32>>,
    certified: bool,
}

/// Votes for every `(round, phase)` at or above the last pruned height.
///
/// Votes are aggregated as a set, so arrival order has no effect on the resulting certificate.
#[derive(Default)]
pub struct Aggregator {
    tallies: BTreeMap<(Round, Phase), Tally>,
}

impl Aggregator {
    /// Add a vote whose signature has already been verified against `committee`.
    pub fn add(&mut self, committee: &Committee, vote: Vote) -> Result<Added, Error> {
        let Some(index) = committee.index_of(vote.voter) else {
            return Ok(Added::Ignored);
        };
        let tally = self.tallies.entry((vote.round, vote.phase)).or_default();
        if let Some(previous) = tally.votes.get(&index) {
            if previous.block == vote.block {
                return Ok(Added::Ignored);
            }
            return Ok(Added::Equivocation(previous.clone()));
        }

        let block = vote.block;
        let (round, phase) = (vote.round, vote.phase);
        tally.votes.insert(index, vote);
        let supporters = tally.blocks.entry(block).or_default();
        supporters.push(index);
        if tally.certified || (supporters.len() as u32) < committee.quorum() {
            return Ok(Added::Counted);
        }

        // Only one block can reach quorum per round and phase without equivocation from more than
        // a third of the committee, so the first certificate is the only one emitted.
        let votes = &tally.votes;
        let (signature, signers) = aggregate(
            committee.size(),
            supporters.iter().map(|index| (*index, &votes[index].signature)),
        )?;
        tally.certified = true;
        Ok(Added::Certified(QuorumCertificate {
            block,
            round,
            phase,
            signature,
            signers,
        }))
    }

    /// Number of distinct voters for `block` in `round` and `phase`.
    #[cfg(test)]
    pub fn count(&self, round: Round, phase: Phase, block: &Digest) -> usize {
        self.tallies
            .get(&(round, phase))
            .and_then(|tally| tally.blocks.get(block))
            .map_or(0, Vec::len)
    }

    /// Drop all votes below `height`.
    pub fn prune(&mut self, height: Height) {
        self.tallies = self
            .tallies
            .split_off(&(Round::new(height, 0), Phase::PreVote));
    }
}
