use crate::error::Error;
use crate::gtfs::{ScheduledStop, StaticTrip};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Read-only lookup structures over one snapshot of the static schedule.
/// Built once per schedule-refresh epoch and shared behind an Arc; the
/// refresh task swaps in a whole new index rather than mutating this one.
#[derive(Debug, Default)]
pub struct ScheduleIndex {
    trips: Vec<StaticTrip>,
    by_id: HashMap<String, usize>,
    weekday_trips: Vec<usize>,
    weekend_trips: Vec<usize>,
}

impl ScheduleIndex {
    /// Validate and index a normalized trip set. An empty input is fine
    /// (reconciliation will simply never match); a trip with no stops or a
    /// non-increasing stop sequence is a schedule defect and rejected.
    pub fn build(trips: Vec<StaticTrip>) -> Result<Self, Error> {
        let mut by_id = HashMap::with_capacity(trips.len());
        let mut weekday_trips = Vec::new();
        let mut weekend_trips = Vec::new();

        for (idx, trip) in trips.iter().enumerate() {
            if trip.stops.is_empty() {
                return Err(Error::Schedule(format!(
                    "trip {} has no stops",
                    trip.trip_id
                )));
            }
            for pair in trip.stops.windows(2) {
                if pair[1].sequence <= pair[0].sequence {
                    return Err(Error::Schedule(format!(
                        "trip {} has non-increasing stop sequence {} -> {}",
                        trip.trip_id, pair[0].sequence, pair[1].sequence
                    )));
                }
            }
            if by_id.insert(trip.trip_id.clone(), idx).is_some() {
                return Err(Error::Schedule(format!(
                    "duplicate trip id {}",
                    trip.trip_id
                )));
            }

            if is_weekend_service(&trip.service_id) {
                weekend_trips.push(idx);
            } else {
                weekday_trips.push(idx);
            }
        }

        Ok(Self {
            trips,
            by_id,
            weekday_trips,
            weekend_trips,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }

    pub fn trip(&self, trip_id: &str) -> Result<&StaticTrip, Error> {
        self.by_id
            .get(trip_id)
            .map(|&idx| &self.trips[idx])
            .ok_or_else(|| Error::NotFound(trip_id.to_string()))
    }

    pub fn stop_plan(&self, trip_id: &str) -> Result<&[ScheduledStop], Error> {
        self.trip(trip_id).map(|t| t.stops.as_slice())
    }

    /// Trip ids whose scheduled window, widened by the activity slacks,
    /// contains the given local time on the given service date.
    pub fn trips_active_at(
        &self,
        date: NaiveDate,
        secs_of_day: u32,
        pre_slack_secs: u32,
        post_slack_secs: u32,
    ) -> Vec<&str> {
        let is_weekend = date.weekday().num_days_from_monday() >= 5;
        let indices = if is_weekend {
            &self.weekend_trips
        } else {
            &self.weekday_trips
        };

        indices
            .iter()
            .filter_map(|&idx| {
                let trip = &self.trips[idx];
                let first = trip.first_arrival_secs()?;
                let last = trip.last_arrival_secs()?;
                let window_start = first.saturating_sub(pre_slack_secs);
                let window_end = last + post_slack_secs;
                (secs_of_day >= window_start && secs_of_day <= window_end)
                    .then_some(trip.trip_id.as_str())
            })
            .collect()
    }
}

fn is_weekend_service(service_id: &str) -> bool {
    let lower = service_id.to_ascii_lowercase();
    lower.contains("weekend")
        || lower.contains("saturday")
        || lower.contains("sunday")
        || lower.contains("sat")
        || lower.contains("sun")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::trip_with_offsets;

    #[test]
    fn build_then_stop_plan_round_trips() {
        let trips = vec![
            trip_with_offsets("t1", "Weekday", &[0, 300, 600]),
            trip_with_offsets("t2", "Weekday", &[900, 1200]),
        ];
        let expected: Vec<_> = trips.iter().map(|t| t.stops.clone()).collect();
        let index = ScheduleIndex::build(trips).unwrap();

        for (trip_id, stops) in [("t1", &expected[0]), ("t2", &expected[1])] {
            let plan = index.stop_plan(trip_id).unwrap();
            assert_eq!(plan, stops.as_slice());
            assert!(plan.windows(2).all(|p| p[1].sequence > p[0].sequence));
        }
    }

    #[test]
    fn build_rejects_empty_trip() {
        let mut trip = trip_with_offsets("t1", "Weekday", &[0]);
        trip.stops.clear();
        let err = ScheduleIndex::build(vec![trip]).unwrap_err();
        assert!(matches!(err, Error::Schedule(_)));
    }

    #[test]
    fn build_rejects_non_increasing_sequence() {
        let mut trip = trip_with_offsets("t1", "Weekday", &[0, 300]);
        trip.stops[1].sequence = trip.stops[0].sequence;
        let err = ScheduleIndex::build(vec![trip]).unwrap_err();
        assert!(matches!(err, Error::Schedule(_)));
    }

    #[test]
    fn build_rejects_duplicate_trip_ids() {
        let trips = vec![
            trip_with_offsets("t1", "Weekday", &[0]),
            trip_with_offsets("t1", "Weekday", &[300]),
        ];
        assert!(matches!(
            ScheduleIndex::build(trips),
            Err(Error::Schedule(_))
        ));
    }

    #[test]
    fn empty_schedule_builds_empty_index() {
        let index = ScheduleIndex::build(Vec::new()).unwrap();
        assert!(index.is_empty());
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        assert!(index.trips_active_at(date, 36_000, 1800, 3600).is_empty());
    }

    #[test]
    fn unknown_trip_is_not_found() {
        let index = ScheduleIndex::build(Vec::new()).unwrap();
        assert_eq!(
            index.stop_plan("nope").unwrap_err(),
            Error::NotFound("nope".to_string())
        );
    }

    #[test]
    fn active_window_respects_service_day_and_slack() {
        // t1 runs weekdays 08:00-09:00, t2 weekends at the same hours.
        let trips = vec![
            trip_with_offsets("t1", "Weekday", &[28_800, 32_400]),
            trip_with_offsets("t2", "Saturday", &[28_800, 32_400]),
        ];
        let index = ScheduleIndex::build(trips).unwrap();

        let monday = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 8).unwrap();

        assert_eq!(index.trips_active_at(monday, 30_000, 1800, 3600), vec!["t1"]);
        assert_eq!(
            index.trips_active_at(saturday, 30_000, 1800, 3600),
            vec!["t2"]
        );
        // 30 min before the first stop is inside the pre-slack window.
        assert_eq!(index.trips_active_at(monday, 27_200, 1800, 3600), vec!["t1"]);
        // Hours after the last stop is outside even with post-slack.
        assert!(index.trips_active_at(monday, 40_000, 1800, 3600).is_empty());
    }
}
