//! In-memory gossip hub; not a network.

use crate::types::ValidatorId;
use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// Delivers every broadcast to all other registered peers.
#[derive(Clone, Default)]
pub struct Hub {
    peers: Arc<Mutex<BTreeMap<ValidatorId, mpsc::UnboundedSender<Bytes>>>>,
}

impl Hub {
    /// Registers a peer and returns its transport.
    pub fn register(&self, id: ValidatorId) -> (Sender, Receiver) {
        let (sender, receiver) = mpsc::unbounded();
        if self.peers.lock().unwrap().insert(id, sender).is_some() {
            panic!("duplicate registrant");
        }
        (
            Sender {
                id,
                hub: self.clone(),
            },
            Receiver { receiver },
        )
    }

    /// Stops delivering messages to `id`.
    pub fn disconnect(&self, id: ValidatorId) {
        self.peers.lock().unwrap().remove(&id);
    }
}

#[derive(Clone)]
pub struct Sender {
    id: ValidatorId,
    hub: Hub,
}

impl crate::Sender for Sender {
    async fn broadcast(&mut self, message: Bytes) {
        let peers = self.hub.peers.lock().unwrap();
        for (id, peer) in peers.iter() {
            if *id == self.id {
                continue;
            }
            let _ = peer.unbounded_send(message.clone());
        }
    }
}

pub struct Receiver {
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl crate::Receiver for Receiver {
    async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.next().await
    }
}
