use crate::error::Error;
use crate::matcher::records::StopStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Per-vehicle carry-over between polling cycles. This is the only state
/// the matching core keeps; everything else is recomputed from the fix and
/// the schedule snapshot each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub vehicle_id: String,
    /// Currently assigned trip, if any. A vehicle between trips or off
    /// route carries None here while staying tracked.
    pub trip_id: Option<String>,
    /// Last matched index into the trip's stop plan (0-based).
    pub stop_index: Option<u32>,
    pub status: Option<StopStatus>,
    /// Smoothed schedule deviation, signed seconds.
    pub delay_secs: Option<i32>,
    pub last_update: u64,
    /// Previous fix coordinates, kept to derive a bearing when the device
    /// does not report one.
    pub last_position: Option<(f64, f64)>,
}

impl MatchState {
    pub fn new(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            trip_id: None,
            stop_index: None,
            status: None,
            delay_secs: None,
            last_update: 0,
            last_position: None,
        }
    }

    /// Record a matched cycle. The monotonicity guard rejects an index that
    /// moves backward on the same trip by more than `backward_slack_stops`;
    /// GPS noise near closely spaced stops may wobble one stop back, but a
    /// larger regression means the match itself is wrong. A trip change
    /// resets the index freely.
    pub fn advance(
        &mut self,
        trip_id: &str,
        stop_index: u32,
        status: StopStatus,
        delay_secs: i32,
        timestamp: u64,
        backward_slack_stops: u32,
    ) -> Result<(), Error> {
        if self.trip_id.as_deref() == Some(trip_id) {
            if let Some(current) = self.stop_index {
                if stop_index + backward_slack_stops < current {
                    return Err(Error::InvalidTransition {
                        trip_id: trip_id.to_string(),
                        from: current,
                        to: stop_index,
                    });
                }
            }
        }

        self.trip_id = Some(trip_id.to_string());
        self.stop_index = Some(stop_index);
        self.status = Some(status);
        self.delay_secs = Some(delay_secs);
        self.last_update = timestamp;
        Ok(())
    }

    /// Record an unmatched cycle: the vehicle stays tracked but loses its
    /// trip assignment and smoothed delay.
    pub fn clear_match(&mut self, timestamp: u64) {
        self.trip_id = None;
        self.stop_index = None;
        self.status = None;
        self.delay_secs = None;
        self.last_update = timestamp;
    }
}

/// Explicit vehicle-id -> MatchState map, owned by the polling driver and
/// passed into each cycle. Serialized to disk periodically so restarts do
/// not lose trip assignments mid-service.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VehicleRegistry {
    states: HashMap<String, MatchState>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let registry = serde_json::from_reader(reader)?;
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn get_or_create(&mut self, vehicle_id: &str) -> &MatchState {
        self.states
            .entry(vehicle_id.to_string())
            .or_insert_with(|| MatchState::new(vehicle_id))
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&MatchState> {
        self.states.get(vehicle_id)
    }

    pub fn insert(&mut self, state: MatchState) {
        self.states.insert(state.vehicle_id.clone(), state);
    }

    pub fn remove(&mut self, vehicle_id: &str) -> Option<MatchState> {
        self.states.remove(vehicle_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_allows_forward_and_small_backward_moves() {
        let mut state = MatchState::new("bus-1");
        state
            .advance("t1", 5, StopStatus::InTransitTo, 30, 100, 1)
            .unwrap();
        state
            .advance("t1", 7, StopStatus::StoppedAt, 45, 160, 1)
            .unwrap();
        // One stop backward is inside the slack.
        state
            .advance("t1", 6, StopStatus::InTransitTo, 45, 220, 1)
            .unwrap();
        assert_eq!(state.stop_index, Some(6));
    }

    #[test]
    fn advance_rejects_large_backward_jump_on_same_trip() {
        let mut state = MatchState::new("bus-1");
        state
            .advance("t1", 8, StopStatus::StoppedAt, 0, 100, 1)
            .unwrap();

        let err = state
            .advance("t1", 3, StopStatus::StoppedAt, 0, 160, 1)
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                trip_id: "t1".to_string(),
                from: 8,
                to: 3,
            }
        );
        // Rejected transitions leave the state untouched.
        assert_eq!(state.stop_index, Some(8));
        assert_eq!(state.last_update, 100);
    }

    #[test]
    fn trip_change_resets_index_freely() {
        let mut state = MatchState::new("bus-1");
        state
            .advance("t1", 12, StopStatus::StoppedAt, 0, 100, 1)
            .unwrap();
        state
            .advance("t2", 0, StopStatus::StoppedAt, 0, 160, 1)
            .unwrap();
        assert_eq!(state.trip_id.as_deref(), Some("t2"));
        assert_eq!(state.stop_index, Some(0));
    }

    #[test]
    fn clear_match_keeps_identity() {
        let mut state = MatchState::new("bus-1");
        state
            .advance("t1", 3, StopStatus::IncomingAt, 15, 100, 1)
            .unwrap();
        state.clear_match(160);
        assert_eq!(state.vehicle_id, "bus-1");
        assert_eq!(state.trip_id, None);
        assert_eq!(state.delay_secs, None);
        assert_eq!(state.last_update, 160);
    }

    #[test]
    fn registry_round_trips_through_json() {
        let mut registry = VehicleRegistry::new();
        registry.get_or_create("bus-1");
        registry.get_or_create("bus-2");

        let path = std::env::temp_dir().join("avl_registry_roundtrip_test.json");
        registry.save(&path).unwrap();
        let restored = VehicleRegistry::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.len(), 2);
        assert!(restored.get("bus-1").is_some());
    }
}
