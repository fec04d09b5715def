use crate::config::MatcherConfig;
use crate::error::Error;
use crate::gtfs::GpsFix;
use crate::matcher::estimator::{self, MatchOutcome};
use crate::matcher::index::ScheduleIndex;
use crate::matcher::proximity::{haversine_distance, initial_bearing};
use crate::matcher::records::{
    AlertRecord, StopRelationship, StopStatus, StopTimeUpdateRecord, TripRef, TripUpdateRecord,
    VehiclePositionRecord,
};
use crate::matcher::state::MatchState;
use chrono::TimeZone;

/// Movement below this between two fixes is jitter, not travel; no bearing
/// is derived from it.
const MIN_BEARING_TRAVEL_M: f64 = 10.0;

/// Everything one reconciliation cycle produces. The caller swaps `state`
/// into its registry and hands the records to the feed encoder; nothing
/// here is persisted by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    pub state: MatchState,
    pub position: VehiclePositionRecord,
    pub trip_update: Option<TripUpdateRecord>,
    pub alerts: Vec<AlertRecord>,
}

/// Per-cycle orchestration: one call per vehicle per polling tick. Holds
/// only configuration, so one instance serves concurrent cycles for
/// different vehicles; cycles for the same vehicle must be serialized by
/// the caller.
#[derive(Debug, Clone)]
pub struct Reconciler {
    cfg: MatcherConfig,
}

impl Reconciler {
    pub fn new(cfg: MatcherConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.cfg
    }

    /// Reconcile one fix against one schedule snapshot and the vehicle's
    /// prior state. Pure function of its inputs. On Err the caller should
    /// log, keep the prior state untouched, and let the next tick retry.
    pub fn reconcile(
        &self,
        fix: &GpsFix,
        index: &ScheduleIndex,
        prior: &MatchState,
        alerts: &[AlertRecord],
    ) -> Result<CycleOutput, Error> {
        let bearing = fix.bearing.or_else(|| self.derived_bearing(fix, prior));

        let outcome = estimator::estimate(fix, index, prior, &self.cfg);

        let mut state = prior.clone();

        let (position, trip_update) = match outcome {
            MatchOutcome::Unmatched => {
                state.clear_match(fix.timestamp);
                (self.bare_position(fix, bearing), None)
            }
            MatchOutcome::Matched(m) => {
                if m.delay_is_fallback {
                    log::warn!(
                        "Vehicle {} delay sample rejected as sensor anomaly, keeping {:?}s",
                        fix.vehicle_id,
                        prior.delay_secs
                    );
                }

                let trip = index.trip(&m.trip_id)?;
                state.advance(
                    &m.trip_id,
                    m.stop_index as u32,
                    m.status,
                    m.delay_secs,
                    fix.timestamp,
                    self.cfg.backward_slack_stops,
                )?;

                let trip_ref = TripRef {
                    trip_id: trip.trip_id.clone(),
                    route_id: trip.route_id.clone(),
                    direction_id: trip.direction_id,
                    start_date: self.service_date(fix.timestamp),
                };

                let stop = &trip.stops[m.stop_index];
                let position = VehiclePositionRecord {
                    vehicle_id: fix.vehicle_id.clone(),
                    trip: Some(trip_ref.clone()),
                    lat: fix.lat,
                    lon: fix.lon,
                    bearing,
                    speed_mps: fix.speed_mps,
                    stop_id: Some(stop.stop_id.clone()),
                    stop_sequence: Some(stop.sequence),
                    status: Some(m.status),
                    timestamp: fix.timestamp,
                };

                let trip_update = self.build_trip_update(fix, trip_ref, trip, &m);
                (position, Some(trip_update))
            }
        };

        state.last_position = Some((fix.lat, fix.lon));

        Ok(CycleOutput {
            state,
            position,
            trip_update,
            // The engine never originates alerts; they arrive already
            // authored and leave unchanged.
            alerts: alerts.to_vec(),
        })
    }

    fn derived_bearing(&self, fix: &GpsFix, prior: &MatchState) -> Option<f32> {
        let (prev_lat, prev_lon) = prior.last_position?;
        let travelled = haversine_distance(prev_lat, prev_lon, fix.lat, fix.lon);
        (travelled >= MIN_BEARING_TRAVEL_M)
            .then(|| initial_bearing(prev_lat, prev_lon, fix.lat, fix.lon))
    }

    fn bare_position(&self, fix: &GpsFix, bearing: Option<f32>) -> VehiclePositionRecord {
        VehiclePositionRecord {
            vehicle_id: fix.vehicle_id.clone(),
            trip: None,
            lat: fix.lat,
            lon: fix.lon,
            bearing,
            speed_mps: fix.speed_mps,
            stop_id: None,
            stop_sequence: None,
            status: None,
            timestamp: fix.timestamp,
        }
    }

    fn build_trip_update(
        &self,
        fix: &GpsFix,
        trip_ref: TripRef,
        trip: &crate::gtfs::StaticTrip,
        m: &estimator::TripMatch,
    ) -> TripUpdateRecord {
        let midnight = self.service_midnight_unix(fix.timestamp);
        let delay = m.delay_secs as i64;

        let stop_time_updates = trip
            .stops
            .iter()
            .enumerate()
            .skip(m.stop_index)
            .map(|(i, stop)| {
                let relationship = if stop.skipped {
                    StopRelationship::Skipped
                } else {
                    StopRelationship::Scheduled
                };

                let scheduled_arrival = midnight + stop.arrival_secs as i64;
                let scheduled_departure = midnight + stop.departure_secs as i64;

                // The stop we are standing at gets the observed arrival;
                // everything ahead gets the propagated delay.
                let (arrival_time, departure_time) =
                    if i == m.stop_index && m.status == StopStatus::StoppedAt {
                        let arrival = fix.timestamp as i64;
                        (arrival, arrival.max(scheduled_departure + delay))
                    } else {
                        (scheduled_arrival + delay, scheduled_departure + delay)
                    };

                StopTimeUpdateRecord {
                    stop_id: stop.stop_id.clone(),
                    stop_sequence: stop.sequence,
                    arrival_time,
                    departure_time,
                    delay_secs: m.delay_secs,
                    relationship,
                }
            })
            .collect();

        TripUpdateRecord {
            vehicle_id: fix.vehicle_id.clone(),
            trip: trip_ref,
            delay_secs: m.delay_secs,
            timestamp: fix.timestamp,
            stop_time_updates,
        }
    }

    fn service_date(&self, timestamp: u64) -> String {
        match self.cfg.timezone.timestamp_opt(timestamp as i64, 0).single() {
            Some(local) => local.format("%Y%m%d").to_string(),
            None => String::new(),
        }
    }

    /// Unix timestamp of local midnight on the fix's service date. Falls
    /// back to the earliest valid instant when a DST transition removes
    /// midnight itself.
    fn service_midnight_unix(&self, timestamp: u64) -> i64 {
        let Some(local) = self.cfg.timezone.timestamp_opt(timestamp as i64, 0).single() else {
            return 0;
        };
        let Some(naive) = local.date_naive().and_hms_opt(0, 0, 0) else {
            return 0;
        };
        self.cfg
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::index::ScheduleIndex;
    use crate::matcher::test_support::{
        fix_at, service_secs_to_unix, trip_with_offsets, utc_config, BASE_LAT, BASE_LON,
    };

    fn reconciler() -> Reconciler {
        Reconciler::new(utc_config())
    }

    fn single_trip_index(arrivals: &[u32]) -> ScheduleIndex {
        ScheduleIndex::build(vec![trip_with_offsets("t1", "Weekday", arrivals)]).unwrap()
    }

    #[test]
    fn matched_cycle_emits_position_and_trip_update() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300, base + 600]);
        let engine = reconciler();
        let prior = MatchState::new("bus-1");

        let fix = fix_at("bus-1", 1, service_secs_to_unix(base + 320));
        let out = engine.reconcile(&fix, &index, &prior, &[]).unwrap();

        assert_eq!(out.state.trip_id.as_deref(), Some("t1"));
        assert_eq!(out.state.stop_index, Some(1));
        assert_eq!(out.state.delay_secs, Some(20));

        let trip_ref = out.position.trip.as_ref().unwrap();
        assert_eq!(trip_ref.trip_id, "t1");
        assert_eq!(trip_ref.start_date, "20240603");
        assert_eq!(out.position.stop_sequence, Some(2));
        assert_eq!(out.position.status, Some(StopStatus::StoppedAt));

        let tu = out.trip_update.unwrap();
        assert_eq!(tu.delay_secs, 20);
        // Updates run from the matched stop to the end of the plan.
        assert_eq!(tu.stop_time_updates.len(), 2);
        assert_eq!(tu.stop_time_updates[0].stop_sequence, 2);
        // The stop we are standing at reports the observed arrival.
        assert_eq!(
            tu.stop_time_updates[0].arrival_time,
            fix.timestamp as i64
        );
        // The stop ahead gets schedule + propagated delay.
        assert_eq!(
            tu.stop_time_updates[1].arrival_time,
            service_secs_to_unix(base + 600) as i64 + 20
        );
    }

    #[test]
    fn unmatched_cycle_emits_bare_position_only() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300]);
        let engine = reconciler();

        let mut prior = MatchState::new("bus-1");
        prior
            .advance("t1", 0, StopStatus::StoppedAt, 5, service_secs_to_unix(base), 1)
            .unwrap();

        let fix = GpsFix {
            vehicle_id: "bus-1".to_string(),
            timestamp: service_secs_to_unix(base + 60),
            lat: BASE_LAT + 1.0,
            lon: BASE_LON,
            speed_mps: None,
            bearing: None,
        };
        let out = engine.reconcile(&fix, &index, &prior, &[]).unwrap();

        assert_eq!(out.position.trip, None);
        assert_eq!(out.position.status, None);
        assert!(out.trip_update.is_none());
        // Trip cleared, identity preserved.
        assert_eq!(out.state.vehicle_id, "bus-1");
        assert_eq!(out.state.trip_id, None);
        assert_eq!(out.state.delay_secs, None);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300, base + 600]);
        let engine = reconciler();
        let prior = MatchState::new("bus-1");
        let fix = fix_at("bus-1", 1, service_secs_to_unix(base + 320));

        let first = engine.reconcile(&fix, &index, &prior, &[]).unwrap();
        let second = engine.reconcile(&fix, &index, &prior, &[]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn backward_jump_is_invalid_transition_and_leaves_prior_usable() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300, base + 600, base + 900]);
        let engine = reconciler();

        let mut prior = MatchState::new("bus-1");
        prior
            .advance("t1", 3, StopStatus::StoppedAt, 0, service_secs_to_unix(base + 900), 1)
            .unwrap();
        let before = prior.clone();

        // The fix sits back on stop 0, outside the forward window's
        // deviation radius, so the re-opened search lands on index 0 and
        // the monotonicity guard fires.
        let fix = fix_at("bus-1", 0, service_secs_to_unix(base + 960));
        let err = engine.reconcile(&fix, &index, &prior, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        // Caller keeps the prior state untouched for the next tick.
        assert_eq!(prior, before);
    }

    #[test]
    fn skip_flag_passes_through_to_updates() {
        let base = 36_000;
        let mut trip = trip_with_offsets("t1", "Weekday", &[base, base + 300, base + 600]);
        trip.stops[2].skipped = true;
        let index = ScheduleIndex::build(vec![trip]).unwrap();
        let engine = reconciler();
        let prior = MatchState::new("bus-1");

        let fix = fix_at("bus-1", 0, service_secs_to_unix(base));
        let out = engine.reconcile(&fix, &index, &prior, &[]).unwrap();
        let tu = out.trip_update.unwrap();

        assert_eq!(tu.stop_time_updates[0].relationship, StopRelationship::Scheduled);
        assert_eq!(tu.stop_time_updates[2].relationship, StopRelationship::Skipped);
    }

    #[test]
    fn alerts_are_forwarded_unchanged() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300]);
        let engine = reconciler();
        let prior = MatchState::new("bus-1");

        let alert = AlertRecord {
            id: "alert-1".to_string(),
            alert: gtfs_realtime::Alert::default(),
        };
        let fix = fix_at("bus-1", 0, service_secs_to_unix(base));
        let out = engine
            .reconcile(&fix, &index, &prior, std::slice::from_ref(&alert))
            .unwrap();
        assert_eq!(out.alerts, vec![alert]);
    }

    #[test]
    fn bearing_is_derived_from_previous_position_when_missing() {
        let base = 36_000;
        let index = single_trip_index(&[base, base + 300]);
        let engine = reconciler();

        let mut prior = MatchState::new("bus-1");
        // Previous fix was ~167 m south of stop 1.
        let (lat, lon) = crate::matcher::test_support::stop_coords(0);
        prior.last_position = Some((lat, lon));

        let fix = fix_at("bus-1", 1, service_secs_to_unix(base + 250));
        let out = engine.reconcile(&fix, &index, &prior, &[]).unwrap();

        let bearing = out.position.bearing.unwrap();
        assert!(bearing < 1.0 || bearing > 359.0, "expected due north, got {bearing}");
        // And the new state remembers this fix for the next cycle.
        assert_eq!(out.state.last_position, Some((fix.lat, fix.lon)));
    }
}
