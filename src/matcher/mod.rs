pub mod engine;
pub mod estimator;
pub mod index;
pub mod proximity;
pub mod records;
pub mod state;

pub use engine::{CycleOutput, Reconciler};
pub use estimator::{MatchOutcome, TripMatch};
pub use index::ScheduleIndex;
pub use records::{
    AlertRecord, StopRelationship, StopStatus, StopTimeUpdateRecord, TripRef, TripUpdateRecord,
    VehiclePositionRecord,
};
pub use state::{MatchState, VehicleRegistry};
