//! Batch signature verification for inbound messages.

use super::{
    types::{Message, Namespaces, QuorumCertificate},
    Committee,
};
use crate::types::{epoch, Epoch, Height};
use rayon::{
    iter::{IntoParallelIterator, ParallelIterator},
    ThreadPool,
};
use std::{collections::BTreeMap, sync::Arc};

/// Verifies signatures and carried certificates before messages reach the state machine.
///
/// The proposal signature is checked during block validation (it depends on the elected leader).
pub struct Verifier {
    namespaces: Namespaces,
    epoch_length: u64,
    pool: Option<Arc<ThreadPool>>,
}

impl Verifier {
    pub fn new(namespaces: Namespaces, epoch_length: u64, pool: Option<Arc<ThreadPool>>) -> Self {
        Self {
            namespaces,
            epoch_length,
            pool,
        }
    }

    /// Returns the messages of `batch` that verify, in their original order.
    pub fn verify(
        &self,
        committees: &BTreeMap<Epoch, Arc<Committee>>,
        batch: Vec<Message>,
    ) -> Vec<Message> {
        match &self.pool {
            Some(pool) if batch.len() > 1 => pool.install(|| {
                batch
                    .into_par_iter()
                    .filter_map(|message| self.check(committees, message))
                    .collect()
            }),
            _ => batch
                .into_iter()
                .filter_map(|message| self.check(committees, message))
                .collect(),
        }
    }

    fn committee<'a>(
        &self,
        committees: &'a BTreeMap<Epoch, Arc<Committee>>,
        height: Height,
    ) -> Option<&'a Committee> {
        committees
            .get(&epoch(height, self.epoch_length))
            .map(|committee| committee.as_ref())
    }

    /// Verify a carried certificate.
    ///
    /// Certificates from an epoch whose committee is unknown are removed (none of them are covered
    /// by the message signature). Certificates that fail verification reject the message.
    fn certificate(
        &self,
        committees: &BTreeMap<Epoch, Arc<Committee>>,
        qc: &mut Option<QuorumCertificate>,
    ) -> bool {
        let Some(height) = qc.as_ref().map(QuorumCertificate::height) else {
            return true;
        };
        match self.committee(committees, height) {
            Some(committee) => qc
                .as_ref()
                .is_some_and(|certificate| certificate.verify(&self.namespaces, committee)),
            None => {
                *qc = None;
                true
            }
        }
    }

    fn check(
        &self,
        committees: &BTreeMap<Epoch, Arc<Committee>>,
        mut message: Message,
    ) -> Option<Message> {
        if let Message::Crosslink(vote) = &message {
            let committee = committees.get(&vote.payload.epoch)?;
            return vote
                .verify(&self.namespaces, committee)
                .then_some(message);
        }
        let committee = self.committee(committees, message.height())?;
        let valid = match &mut message {
            Message::Proposal(proposal) => {
                let justified = match &mut proposal.justify {
                    Some(new_view) => {
                        new_view.verify(&self.namespaces, committee)
                            && self.certificate(committees, &mut new_view.high_qc)
                    }
                    None => true,
                };
                justified && self.certificate(committees, &mut proposal.parent)
            }
            Message::PreVote(vote) | Message::PreCommit(vote) => {
                vote.verify(&self.namespaces, committee)
            }
            Message::ViewChange(view_change) => {
                view_change.verify(&self.namespaces, committee)
                    && self.certificate(committees, &mut view_change.last_known_qc)
            }
            Message::NewView(new_view) => {
                new_view.verify(&self.namespaces, committee)
                    && self.certificate(committees, &mut new_view.high_qc)
            }
            Message::Crosslink(_) => false,
        };
        valid.then_some(message)
    }
}
