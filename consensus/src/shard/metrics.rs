use super::types::Message;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

const PROPOSAL_TYPE: i32 = 0;
const PREVOTE_TYPE: i32 = 1;
const PRECOMMIT_TYPE: i32 = 2;
const VIEW_CHANGE_TYPE: i32 = 3;
const NEW_VIEW_TYPE: i32 = 4;
const CROSSLINK_TYPE: i32 = 5;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Inbound {
    pub message: i32,
}

impl Inbound {
    pub fn of(message: &Message) -> Self {
        let message = match message {
            Message::Proposal(_) => PROPOSAL_TYPE,
            Message::PreVote(_) => PREVOTE_TYPE,
            Message::PreCommit(_) => PRECOMMIT_TYPE,
            Message::ViewChange(_) => VIEW_CHANGE_TYPE,
            Message::NewView(_) => NEW_VIEW_TYPE,
            Message::Crosslink(_) => CROSSLINK_TYPE,
        };
        Self { message }
    }
}

/// Metrics for a shard engine.
#[derive(Clone, Default)]
pub struct Metrics {
    pub height: Gauge,
    pub view: Gauge,
    pub finalized: Counter,
    pub view_changes: Counter,
    pub inbound: Family<Inbound, Counter>,
    pub invalid: Counter,
    pub evidence: Counter,
    pub stalls: Counter,
    pub crosslinks_submitted: Counter,
    pub crosslinks_rejected: Counter,
}

impl Metrics {
    /// Create and register metrics with `registry`.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register("height", "height being decided", metrics.height.clone());
        registry.register("view", "current view", metrics.view.clone());
        registry.register("finalized", "finalized blocks", metrics.finalized.clone());
        registry.register(
            "view_changes",
            "rounds that timed out",
            metrics.view_changes.clone(),
        );
        registry.register(
            "inbound_messages",
            "inbound messages by type",
            metrics.inbound.clone(),
        );
        registry.register(
            "invalid_messages",
            "messages that failed decoding or validation",
            metrics.invalid.clone(),
        );
        registry.register(
            "evidence",
            "misbehavior reported",
            metrics.evidence.clone(),
        );
        registry.register(
            "stalls",
            "view changes that did not reach quorum",
            metrics.stalls.clone(),
        );
        registry.register(
            "crosslinks_submitted",
            "crosslinks submitted to the beacon chain",
            metrics.crosslinks_submitted.clone(),
        );
        registry.register(
            "crosslinks_rejected",
            "crosslinks rejected by the beacon chain",
            metrics.crosslinks_rejected.clone(),
        );
        metrics
    }
}
