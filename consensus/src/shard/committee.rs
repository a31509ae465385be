//! Deterministic assignment of validators to shard committees.
//!
//! Given the same validator set, shard count and epoch seed, [select_committee] produces the same
//! committees on every machine: the active validators are sorted by id, shuffled with a
//! seed-keyed Fisher–Yates pass and split into equally sized committees.

use super::Error;
use crate::types::{Epoch, ShardId, ValidatorId};
use shardline_cryptography::{bls12381::PublicKey, Digest, Hasher, Sha256};
use shardline_utils::{modulo, quorum};
use std::{collections::HashMap, ops::Range};

/// Random seed supplied by the randomness beacon for an epoch.
pub type Seed = Digest;

/// A validator as published by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validator {
    pub id: ValidatorId,
    pub public_key: PublicKey,
    /// Effective stake (in the registry's smallest unit).
    pub stake: u64,
    /// Epochs (end exclusive) during which the validator may be selected.
    pub active: Range<Epoch>,
}

impl Validator {
    /// Returns true if the validator can be selected for `epoch`.
    pub fn is_eligible(&self, epoch: Epoch) -> bool {
        self.stake > 0 && self.active.contains(&epoch)
    }
}

/// The validators assigned to a shard for one epoch.
///
/// A committee is immutable: it is replaced (never updated) at the next epoch boundary and can be
/// shared freely across threads.
#[derive(Clone, Debug)]
pub struct Committee {
    shard: ShardId,
    epoch: Epoch,
    seed: Seed,
    members: Vec<Validator>,
    indices: HashMap<ValidatorId, u32>,
    total_stake: u64,
}

impl Committee {
    /// Create a committee with members in the given order.
    pub fn new(
        shard: ShardId,
        epoch: Epoch,
        seed: Seed,
        members: Vec<Validator>,
    ) -> Result<Self, Error> {
        let mut indices = HashMap::with_capacity(members.len());
        let mut total_stake: u64 = 0;
        for (index, member) in members.iter().enumerate() {
            if indices.insert(member.id, index as u32).is_some() {
                return Err(Error::DuplicateValidator(member.id));
            }
            total_stake = total_stake
                .checked_add(member.stake)
                .ok_or(Error::StakeOverflow)?;
        }
        Ok(Self {
            shard,
            epoch,
            seed,
            members,
            indices,
            total_stake,
        })
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Number of members (`N`).
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    /// Minimum number of distinct members whose signatures form a certificate.
    pub fn quorum(&self) -> u32 {
        quorum(self.size())
    }

    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }

    /// Members in committee order.
    pub fn members(&self) -> &[Validator] {
        &self.members
    }

    /// Returns the committee index of `id`, if it is a member.
    pub fn index_of(&self, id: ValidatorId) -> Option<u32> {
        self.indices.get(&id).copied()
    }

    pub fn member(&self, index: u32) -> Option<&Validator> {
        self.members.get(index as usize)
    }

    /// Returns the public key of member `id`.
    pub fn public_key(&self, id: ValidatorId) -> Option<&PublicKey> {
        self.index_of(id).map(|index| &self.members[index as usize].public_key)
    }
}

/// Assign the eligible validators of `epoch` to `shard_count` committees.
///
/// Each committee receives `floor(n / shard_count)` members, where `n` is the number of eligible
/// validators; the remainder sits out the epoch. Fails with [Error::InsufficientValidators] if a
/// committee would have fewer than `min_committee_size` members.
pub fn select_committee(
    validators: &[Validator],
    shard_count: u16,
    epoch: Epoch,
    seed: &Seed,
    min_committee_size: usize,
) -> Result<Vec<Committee>, Error> {
    if shard_count == 0 {
        return Err(Error::NoShards);
    }

    // Canonical order so the caller's ordering has no influence
    let mut eligible: Vec<&Validator> = validators.iter().filter(|v| v.is_eligible(epoch)).collect();
    eligible.sort_by_key(|v| v.id);
    if let Some(pair) = eligible.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(Error::DuplicateValidator(pair[0].id));
    }

    let per_shard = eligible.len() / shard_count as usize;
    if per_shard == 0 || per_shard < min_committee_size {
        return Err(Error::InsufficientValidators {
            available: eligible.len(),
            required: min_committee_size.max(1) * shard_count as usize,
        });
    }

    shuffle(&mut eligible, seed);
    eligible
        .chunks_exact(per_shard)
        .take(shard_count as usize)
        .enumerate()
        .map(|(shard, members)| {
            let members = members.iter().map(|v| (*v).clone()).collect();
            Committee::new(shard as ShardId, epoch, *seed, members)
        })
        .collect()
}

/// Fisher–Yates shuffle where the swap target for position `i` is `H(seed || i) mod (i + 1)`.
fn shuffle<T>(items: &mut [T], seed: &Seed) {
    let mut hasher = Sha256::new();
    for i in (1..items.len()).rev() {
        hasher.update(seed);
        hasher.update(&(i as u64).to_be_bytes());
        let j = modulo(&hasher.finalize(), i as u64 + 1) as usize;
        items.swap(i, j);
    }
}
