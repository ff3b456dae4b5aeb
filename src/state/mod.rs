//! Observed state: normalization into snapshots and projection onto the
//! closed validity state space.

mod feed;
mod projector;
mod snapshot;

pub use feed::{Observation, ObservationFeed};
pub use projector::{Delta, ProjectedState, StateFlag, classify, encode, project};
pub use snapshot::{Bounds, Snapshot, normalize};
