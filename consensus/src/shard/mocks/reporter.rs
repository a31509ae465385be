use crate::{
    shard::types::{Activity, Alert, BlockFinalized, SlashableEvidence},
    types::Height,
};
use std::sync::{Arc, Mutex};

/// Records every reported activity.
#[derive(Clone, Default)]
pub struct Reporter {
    pub activity: Arc<Mutex<Vec<Activity>>>,
}

impl Reporter {
    pub fn finalized(&self) -> Vec<BlockFinalized> {
        self.activity
            .lock()
            .unwrap()
            .iter()
            .filter_map(|activity| match activity {
                Activity::Finalized(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn height(&self) -> Height {
        self.finalized().last().map_or(0, |event| event.height)
    }

    pub fn evidence(&self) -> Vec<SlashableEvidence> {
        self.activity
            .lock()
            .unwrap()
            .iter()
            .filter_map(|activity| match activity {
                Activity::Evidence(evidence) => Some(evidence.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.activity
            .lock()
            .unwrap()
            .iter()
            .filter_map(|activity| match activity {
                Activity::Alert(alert) => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }
}

impl crate::Reporter for Reporter {
    async fn report(&mut self, activity: Activity) {
        self.activity.lock().unwrap().push(activity);
    }
}
