pub mod types;
pub mod estimator;
pub mod ordering;
pub mod lifecycle;
pub mod geofence;
pub mod snapshot;
pub mod engine;

pub use types::{
    new_id, CheckInEntry, CheckInStatus, ClinicDay, LocationCheck, LocationProof, NewCheckIn, Priority,
    QueueStanding,
};
pub use geofence::{Geofence, DEFAULT_RADIUS_M};
pub use snapshot::{ClinicQueueSnapshot, SnapshotEntry};
pub use engine::{CheckInRequest, EngineSettings, QueueEngine};
