//! Mock randomness beacon, validator registry and beacon chain.

use crate::{
    shard::{
        select_committee,
        types::{Crosslink, CrosslinkPayload, Namespaces},
        Seed, Validator,
    },
    types::{Epoch, ShardId},
    Rejection,
};
use shardline_cryptography::Digest;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Seeds revealed so far.
#[derive(Clone, Default)]
pub struct Beacon {
    seeds: Arc<Mutex<HashMap<Epoch, Seed>>>,
}

impl Beacon {
    pub fn reveal(&self, epoch: Epoch, seed: Seed) {
        self.seeds.lock().unwrap().insert(epoch, seed);
    }

    fn get(&self, epoch: Epoch) -> Option<Seed> {
        self.seeds.lock().unwrap().get(&epoch).copied()
    }
}

impl crate::Beacon for Beacon {
    async fn seed(&mut self, epoch: Epoch) -> Option<Seed> {
        self.get(epoch)
    }
}

#[derive(Clone)]
pub struct Registry {
    validators: Arc<Vec<Validator>>,
}

impl Registry {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self {
            validators: Arc::new(validators),
        }
    }
}

impl crate::Registry for Registry {
    async fn validators(&mut self, _: Epoch) -> Vec<Validator> {
        self.validators.as_ref().clone()
    }
}

/// Verifies crosslinks against independently derived committees and records them.
#[derive(Clone)]
pub struct BeaconChain {
    namespaces: Namespaces,
    shard_count: u16,
    min_committee_size: usize,
    beacon: Beacon,
    registry: Registry,

    pub accepted: Arc<Mutex<Vec<Crosslink>>>,
    pub rejected: Arc<Mutex<Vec<(Crosslink, Rejection)>>>,
    latest: Arc<Mutex<HashMap<ShardId, CrosslinkPayload>>>,
}

impl BeaconChain {
    pub fn new(
        namespace: &[u8],
        shard_count: u16,
        min_committee_size: usize,
        beacon: Beacon,
        registry: Registry,
    ) -> Self {
        Self {
            namespaces: Namespaces::new(namespace),
            shard_count,
            min_committee_size,
            beacon,
            registry,
            accepted: Arc::default(),
            rejected: Arc::default(),
            latest: Arc::default(),
        }
    }

    fn check(&self, crosslink: &Crosslink) -> Result<(), Rejection> {
        let payload = &crosslink.payload;
        if payload.shard >= self.shard_count {
            return Err(Rejection::UnknownShard);
        }
        let seed = self
            .beacon
            .get(payload.epoch)
            .ok_or(Rejection::UnknownCommittee)?;
        let committee = select_committee(
            &self.registry.validators,
            self.shard_count,
            payload.epoch,
            &seed,
            self.min_committee_size,
        )
        .map_err(|_| Rejection::UnknownCommittee)?
        .into_iter()
        .nth(payload.shard as usize)
        .ok_or(Rejection::UnknownShard)?;
        if !crosslink.verify(&self.namespaces, &committee) {
            return Err(Rejection::InvalidSignature);
        }
        let mut latest = self.latest.lock().unwrap();
        let previous = latest.get(&payload.shard);
        if previous.is_some_and(|previous| payload.slot <= previous.slot) {
            return Err(Rejection::Stale);
        }
        if payload.parent != previous.map_or(Digest::ZERO, CrosslinkPayload::root) {
            return Err(Rejection::Unlinked);
        }
        latest.insert(payload.shard, payload.clone());
        Ok(())
    }
}

impl crate::BeaconChain for BeaconChain {
    async fn latest(&mut self, shard: ShardId) -> Option<CrosslinkPayload> {
        self.latest.lock().unwrap().get(&shard).cloned()
    }

    async fn submit(&mut self, crosslink: Crosslink) -> Result<(), Rejection> {
        let result = self.check(&crosslink);
        match &result {
            Ok(()) => self.accepted.lock().unwrap().push(crosslink),
            Err(reason) => self
                .rejected
                .lock()
                .unwrap()
                .push((crosslink, reason.clone())),
        }
        result
    }
}
