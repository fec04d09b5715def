use serde::{Deserialize, Serialize};

/// Where the vehicle stands relative to its matched stop. Mirrors the wire
/// enum but stays wire-independent; the feed encoder does the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    IncomingAt,
    StoppedAt,
    InTransitTo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripRef {
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: Option<u32>,
    /// Service date, YYYYMMDD in the agency timezone.
    pub start_date: String,
}

/// One vehicle's position for this cycle. `trip` and the stop fields are
/// absent when the cycle came back unmatched: the position is still
/// published bare, just without schedule context.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePositionRecord {
    pub vehicle_id: String,
    pub trip: Option<TripRef>,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f32>,
    pub speed_mps: Option<f32>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub status: Option<StopStatus>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRelationship {
    Scheduled,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeUpdateRecord {
    pub stop_id: String,
    pub stop_sequence: u32,
    /// Predicted arrival/departure, unix seconds.
    pub arrival_time: i64,
    pub departure_time: i64,
    pub delay_secs: i32,
    pub relationship: StopRelationship,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdateRecord {
    pub vehicle_id: String,
    pub trip: TripRef,
    /// Smoothed schedule deviation, signed seconds, positive = late.
    pub delay_secs: i32,
    pub timestamp: u64,
    /// Updates from the currently matched stop to the end of the plan.
    pub stop_time_updates: Vec<StopTimeUpdateRecord>,
}

/// Externally authored alert, forwarded untouched. The payload is already
/// in wire shape because the core has nothing to add to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: String,
    pub alert: gtfs_realtime::Alert,
}
