//! Round deadlines and view change aggregation.

use super::{
    types::{aggregate, highest, NewView, QuorumCertificate, ViewChange},
    Committee, Error,
};
use crate::types::{Height, Round, View};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

/// Returns how long to wait for progress in `view`: `base * 2^view`, capped at `max`.
pub fn timeout(base: Duration, max: Duration, view: View) -> Duration {
    u32::try_from(view)
        .ok()
        .and_then(|shift| 1u32.checked_shl(shift))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |timeout| timeout.min(max))
}

#[derive(Default)]
struct Pending {
    messages: HashMap<u32, ViewChange>,
    high_qc: Option<QuorumCertificate>,
    assembled: bool,
}

/// Collects [ViewChange] messages per `(height, new_view)` and assembles a [NewView] once a
/// quorum agrees.
#[derive(Default)]
pub struct Collector {
    rounds: BTreeMap<Round, Pending>,
}

impl Collector {
    /// Add a view change whose signature (and carried certificate) was already verified.
    ///
    /// Returns the [NewView] the first time a quorum is reached for its round.
    pub fn add(
        &mut self,
        committee: &Committee,
        message: ViewChange,
    ) -> Result<Option<NewView>, Error> {
        let Some(index) = committee.index_of(message.validator) else {
            return Ok(None);
        };
        let round = Round::new(message.height, message.new_view);
        let pending = self.rounds.entry(round).or_default();
        if pending.messages.contains_key(&index) {
            return Ok(None);
        }
        pending.high_qc = highest(pending.high_qc.take(), message.last_known_qc.clone());
        pending.messages.insert(index, message);
        if pending.assembled || (pending.messages.len() as u32) < committee.quorum() {
            return Ok(None);
        }

        let (signature, signers) = aggregate(
            committee.size(),
            pending
                .messages
                .iter()
                .map(|(index, message)| (*index, &message.signature)),
        )?;
        pending.assembled = true;
        Ok(Some(NewView {
            height: round.height,
            view: round.view,
            signature,
            signers,
            high_qc: pending.high_qc.clone(),
        }))
    }

    /// Mark a round as settled (for instance after receiving its [NewView] from a peer).
    pub fn settle(&mut self, round: Round) {
        self.rounds.entry(round).or_default().assembled = true;
    }

    /// Number of distinct view change messages for `round`.
    pub fn count(&self, round: Round) -> usize {
        self.rounds.get(&round).map_or(0, |p| p.messages.len())
    }

    /// Drop all messages below `height`.
    pub fn prune(&mut self, height: Height) {
        self.rounds = self.rounds.split_off(&Round::new(height, 0));
    }
}
