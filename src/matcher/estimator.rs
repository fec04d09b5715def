use crate::config::MatcherConfig;
use crate::gtfs::{GpsFix, ScheduledStop};
use crate::matcher::index::ScheduleIndex;
use crate::matcher::proximity::{initial_bearing, nearest_stop_in_window};
use crate::matcher::records::StopStatus;
use crate::matcher::state::MatchState;
use chrono::{TimeZone, Timelike};

/// A successful match of one fix to one scheduled stop.
#[derive(Debug, Clone, PartialEq)]
pub struct TripMatch {
    pub trip_id: String,
    pub stop_index: usize,
    pub status: StopStatus,
    pub delay_secs: i32,
    pub distance_m: f64,
    /// True when the raw delay sample jumped past the configured clamp and
    /// the previous smoothed delay was kept instead.
    pub delay_is_fallback: bool,
}

/// Outcome of one estimation. Unmatched is a normal business result
/// (vehicle off route, deadheading, out of service), distinct from the
/// error taxonomy in `crate::error`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(TripMatch),
    Unmatched,
}

/// Pure function of (fix, schedule snapshot, previous-cycle hint, config).
/// No clocks, no I/O; calling it twice with the same inputs gives the same
/// answer.
pub fn estimate(
    fix: &GpsFix,
    index: &ScheduleIndex,
    prior: &MatchState,
    cfg: &MatcherConfig,
) -> MatchOutcome {
    let Some(local) = cfg.timezone.timestamp_opt(fix.timestamp as i64, 0).single() else {
        return MatchOutcome::Unmatched;
    };
    let secs_of_day = local.num_seconds_from_midnight();
    let date = local.date_naive();

    let active = index.trips_active_at(
        date,
        secs_of_day,
        cfg.activity_pre_slack_secs,
        cfg.activity_post_slack_secs,
    );
    if active.is_empty() {
        return MatchOutcome::Unmatched;
    }

    let candidate = continuity_candidate(fix, index, prior, &active, cfg)
        .or_else(|| search_all_active(fix, index, &active, cfg));

    let Some((trip_id, stop_index, distance_m)) = candidate else {
        return MatchOutcome::Unmatched;
    };

    // The plan is known to exist; both candidate paths read it above.
    let Ok(plan) = index.stop_plan(&trip_id) else {
        return MatchOutcome::Unmatched;
    };
    let stop = &plan[stop_index];

    let status = classify_status(fix, stop, distance_m, cfg);

    let raw_delay = (secs_of_day as i64 - stop.arrival_secs as i64) as i32;
    let (delay_secs, delay_is_fallback) = smooth_delay(raw_delay, prior, &trip_id, cfg);

    MatchOutcome::Matched(TripMatch {
        trip_id,
        stop_index,
        status,
        delay_secs,
        distance_m,
        delay_is_fallback,
    })
}

/// Prefer the previously assigned trip while it is still active and the
/// fix stays within the deviation radius of its forward stop window. The
/// window starts at the previous index so GPS noise cannot drag the match
/// backward along the plan.
fn continuity_candidate(
    fix: &GpsFix,
    index: &ScheduleIndex,
    prior: &MatchState,
    active: &[&str],
    cfg: &MatcherConfig,
) -> Option<(String, usize, f64)> {
    let prev_trip = prior.trip_id.as_deref()?;
    if !active.contains(&prev_trip) {
        return None;
    }
    let plan = index.stop_plan(prev_trip).ok()?;

    let (start, end) = match prior.stop_index {
        Some(idx) => (idx as usize, idx as usize + cfg.lookahead_stops + 1),
        None => (0, plan.len()),
    };

    let (idx, dist) =
        nearest_stop_in_window(plan, fix.lat, fix.lon, start, end, cfg.tie_epsilon_m)?;

    // Past the deviation radius the continuity bias no longer applies and
    // the candidate search re-opens across all active trips.
    (dist <= cfg.deviation_radius_m).then(|| (prev_trip.to_string(), idx, dist))
}

/// Full search across every active trip's whole stop plan. Only distances
/// within the approach radius count; farther than that from everything is
/// the unmatched outcome.
fn search_all_active(
    fix: &GpsFix,
    index: &ScheduleIndex,
    active: &[&str],
    cfg: &MatcherConfig,
) -> Option<(String, usize, f64)> {
    let mut best: Option<(String, usize, f64)> = None;

    for trip_id in active {
        let Ok(plan) = index.stop_plan(trip_id) else {
            continue;
        };
        if let Some((idx, dist)) =
            nearest_stop_in_window(plan, fix.lat, fix.lon, 0, plan.len(), cfg.tie_epsilon_m)
        {
            if best.as_ref().map(|&(_, _, d)| dist < d).unwrap_or(true) {
                best = Some((trip_id.to_string(), idx, dist));
            }
        }
    }

    best.filter(|&(_, _, dist)| dist <= cfg.approach_radius_m)
}

fn classify_status(
    fix: &GpsFix,
    stop: &ScheduledStop,
    distance_m: f64,
    cfg: &MatcherConfig,
) -> StopStatus {
    if distance_m <= cfg.at_stop_radius_m {
        return StopStatus::StoppedAt;
    }
    if distance_m <= cfg.approach_radius_m && moving_toward(fix, stop, cfg) {
        return StopStatus::IncomingAt;
    }
    StopStatus::InTransitTo
}

/// A vehicle counts as approaching when it reports enough speed and, if it
/// reports a bearing, that bearing points at the stop within a quarter
/// turn. Without a speed reading we stay at IN_TRANSIT_TO.
fn moving_toward(fix: &GpsFix, stop: &ScheduledStop, cfg: &MatcherConfig) -> bool {
    let moving = fix
        .speed_mps
        .map(|s| s >= cfg.min_motion_speed_mps)
        .unwrap_or(false);
    if !moving {
        return false;
    }
    match fix.bearing {
        Some(bearing) => {
            let toward = initial_bearing(fix.lat, fix.lon, stop.lat, stop.lon);
            let diff = (bearing - toward).abs() % 360.0;
            diff.min(360.0 - diff) <= 90.0
        }
        None => true,
    }
}

/// One bad fix must not swing the published delay. A sample that jumps
/// more than the clamp from the previous smoothed value on the same trip
/// is treated as a sensor anomaly and the previous delay is kept. A trip
/// change starts the estimate fresh.
fn smooth_delay(
    raw_delay: i32,
    prior: &MatchState,
    trip_id: &str,
    cfg: &MatcherConfig,
) -> (i32, bool) {
    if prior.trip_id.as_deref() == Some(trip_id) {
        if let Some(prev) = prior.delay_secs {
            if (raw_delay - prev).abs() > cfg.max_delay_jump_secs {
                return (prev, true);
            }
        }
    }
    (raw_delay, false)
}
