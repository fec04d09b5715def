/// One entry of a trip's ordered stop plan. Coordinates are denormalized
/// onto the stop entry so matching never needs a second lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStop {
    pub stop_id: String,
    pub stop_name: String,
    pub sequence: u32,
    /// Scheduled arrival, seconds since local midnight of the service date.
    /// GTFS allows values past 86400 for after-midnight service.
    pub arrival_secs: u32,
    pub departure_secs: u32,
    pub lat: f64,
    pub lon: f64,
    /// Externally supplied skip flag (pickup_type=1 and drop_off_type=1).
    /// Passed through to trip updates, never computed here.
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticTrip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: Option<u32>,
    pub stops: Vec<ScheduledStop>,
}

impl StaticTrip {
    pub fn first_arrival_secs(&self) -> Option<u32> {
        self.stops.first().map(|s| s.arrival_secs)
    }

    pub fn last_arrival_secs(&self) -> Option<u32> {
        self.stops.last().map(|s| s.arrival_secs)
    }
}

/// A single GPS sample for one vehicle, consumed once per polling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub vehicle_id: String,
    /// Unix seconds. Must be non-decreasing per vehicle; the poller drops
    /// stale samples before they reach the engine.
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
    pub speed_mps: Option<f32>,
    pub bearing: Option<f32>,
}
