//! Stake-weighted proposer election.
//!
//! The proposer for a [Round] is drawn from the committee with probability proportional to stake.
//! The draw is a pure function of the epoch seed, the round and the committee, so any party can
//! replay it for a past round.

use super::{committee::Seed, Committee, Error};
use crate::types::{Round, ValidatorId};
use shardline_cryptography::{Hasher, Sha256};
use shardline_utils::modulo;

/// Returns the committee index of the proposer for `round`.
pub fn leader_index(committee: &Committee, round: Round, seed: &Seed) -> Result<u32, Error> {
    if committee.size() == 0 {
        return Err(Error::EmptyCommittee);
    }
    let total = committee.total_stake();
    if total == 0 {
        return Err(Error::NoStake);
    }

    // Round seed: H(seed || height || view)
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(&round.height.to_be_bytes());
    hasher.update(&round.view.to_be_bytes());
    let point = modulo(&hasher.finalize(), total);

    // Walk the cumulative stake distribution
    let mut cumulative: u64 = 0;
    for (index, member) in committee.members().iter().enumerate() {
        cumulative += member.stake;
        if point < cumulative {
            return Ok(index as u32);
        }
    }
    unreachable!("point is below total stake")
}

/// Returns the validator that proposes in `round`.
pub fn select_leader(committee: &Committee, round: Round, seed: &Seed) -> Result<ValidatorId, Error> {
    let index = leader_index(committee, round, seed)?;
    Ok(committee.members()[index as usize].id)
}

impl Committee {
    /// Returns the proposer for `round` under this committee's own seed.
    pub fn leader(&self, round: Round) -> Result<ValidatorId, Error> {
        select_leader(self, round, self.seed())
    }
}
