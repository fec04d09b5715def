use crate::gtfs::ScheduledStop;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from point 1 to point 2, degrees 0..360.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f32 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();
    let bearing = y.atan2(x).to_degrees();

    ((bearing + 360.0) % 360.0) as f32
}

/// Nearest stop to the fix within `[start, end)` of the stop plan.
/// Returns the plan index and the distance in meters. When two stops are
/// within `tie_epsilon_m` of each other the later sequence index wins,
/// since vehicles are assumed to move forward along the route.
pub fn nearest_stop_in_window(
    stops: &[ScheduledStop],
    lat: f64,
    lon: f64,
    start: usize,
    end: usize,
    tie_epsilon_m: f64,
) -> Option<(usize, f64)> {
    let end = end.min(stops.len());
    let mut best: Option<(usize, f64)> = None;

    for (idx, stop) in stops.iter().enumerate().take(end).skip(start) {
        let dist = haversine_distance(lat, lon, stop.lat, stop.lon);
        match best {
            None => best = Some((idx, dist)),
            Some((_, best_dist)) => {
                if dist < best_dist || dist - best_dist <= tie_epsilon_m {
                    best = Some((idx, dist));
                }
            }
        }
    }

    best
}
