use thiserror::Error;

/// Failures the matching core can produce. None of these are fatal to the
/// process: schedule errors keep the previous index alive, the other two
/// skip the affected vehicle's cycle until the next tick.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed schedule: {0}")]
    Schedule(String),

    #[error("unknown trip id: {0}")]
    NotFound(String),

    #[error("invalid stop transition on trip {trip_id}: index {from} -> {to}")]
    InvalidTransition {
        trip_id: String,
        from: u32,
        to: u32,
    },
}
