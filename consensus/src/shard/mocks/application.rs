//! Mock execution: blocks carry one transaction encoding their height.

use crate::{
    shard::types::{Block, Body, Context, Payload},
    types::Height,
};
use bytes::Bytes;
use futures::channel::oneshot;
use shardline_cryptography::{Digest, Hasher, Sha256};
use std::sync::{Arc, Mutex};

/// State root after applying `body` on top of `parent`.
pub fn transition(parent: &Digest, body: &Body) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_ref());
    hasher.update(body.root().as_ref());
    hasher.finalize()
}

#[derive(Clone, Default)]
pub struct Application {
    /// Number of blocks checked.
    pub verified: Arc<Mutex<usize>>,

    /// Highest height a payload is built for (unbounded if `None`).
    pub limit: Option<Height>,
}

impl Application {
    /// Stop building payloads after `height`.
    pub fn until(height: Height) -> Self {
        Self {
            limit: Some(height),
            ..Self::default()
        }
    }
}

impl crate::Execution for Application {
    async fn propose(&mut self, context: Context) -> oneshot::Receiver<Payload> {
        let (sender, receiver) = oneshot::channel();
        if self.limit.is_some_and(|limit| context.round.height > limit) {
            return receiver;
        }
        let body = Body {
            transactions: vec![Bytes::from(context.round.height.to_be_bytes().to_vec())],
            ..Body::default()
        };
        let state_root = transition(&context.parent.state_root, &body);
        let _ = sender.send(Payload { body, state_root });
        receiver
    }

    async fn verify(&mut self, context: Context, block: Block) -> oneshot::Receiver<bool> {
        let (sender, receiver) = oneshot::channel();
        *self.verified.lock().unwrap() += 1;
        let expected = transition(&context.parent.state_root, block.body());
        let _ = sender.send(block.header().state_root == expected);
        receiver
    }
}
