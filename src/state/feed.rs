use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use super::Delta;

/// One inbound event from the observation collaborator: the raw capture and
/// the change pressure observed with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub raw: Value,
    #[serde(default)]
    pub delta: Delta,
}

impl Observation {
    /// Focus used before any observation arrives: a Finder toolbar button.
    pub fn simulated() -> Self {
        Self {
            raw: serde_json::json!({
                "app": "Finder",
                "role": "AXButton",
                "label": "Back",
                "focused": true,
                "enabled": true,
                "stable": true,
                "bbox": [12, 40, 28, 24]
            }),
            delta: Delta::NONE,
        }
    }
}

/// Latest-value channel for observations. Cycles read whatever is current;
/// older observations are superseded, not queued.
#[derive(Debug, Clone)]
pub struct ObservationFeed {
    tx: watch::Sender<Observation>,
}

impl ObservationFeed {
    pub fn new(initial: Observation) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn publish(&self, observation: Observation) {
        self.tx.send_replace(observation);
    }

    pub fn latest(&self) -> Observation {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Observation> {
        self.tx.subscribe()
    }
}
