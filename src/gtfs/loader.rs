use crate::gtfs::{ScheduledStop, StaticTrip};
use std::collections::HashMap;
use std::io::{Cursor, Read};

type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Download a static GTFS zip and normalize it into the strict StaticTrip
/// shape. Validation of stop ordering happens later in ScheduleIndex::build;
/// this stage only rejects structurally unreadable input.
pub async fn load_static_schedule(url: &str) -> Result<Vec<StaticTrip>, LoadError> {
    log::info!("Downloading static GTFS from {}", url);

    let response = reqwest::get(url).await?.error_for_status()?;
    let bytes = response.bytes().await?;

    log::info!("Downloaded {} bytes, extracting", bytes.len());

    let cursor = Cursor::new(bytes.as_ref());
    let mut archive = zip::ZipArchive::new(cursor)?;

    let stops = parse_stops(&mut archive)?;
    let trips_raw = parse_trips(&mut archive)?;
    let mut stop_times = parse_stop_times(&mut archive, &stops)?;

    let mut trips = Vec::with_capacity(trips_raw.len());
    for raw in trips_raw {
        let stops = stop_times.remove(&raw.trip_id).unwrap_or_default();
        trips.push(StaticTrip {
            trip_id: raw.trip_id,
            route_id: raw.route_id,
            service_id: raw.service_id,
            direction_id: raw.direction_id,
            stops,
        });
    }

    Ok(trips)
}

struct StopRow {
    name: String,
    lat: f64,
    lon: f64,
}

struct TripRow {
    trip_id: String,
    route_id: String,
    service_id: String,
    direction_id: Option<u32>,
}

fn read_file(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<String, LoadError> {
    let mut file = archive.by_name(name)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

/// Column lookup by header name. GTFS files have no fixed column order, so
/// positional indexing is not safe across agencies.
fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn require_column(headers: &csv::StringRecord, name: &str, file: &str) -> Result<usize, LoadError> {
    column(headers, name).ok_or_else(|| format!("{file} is missing column {name}").into())
}

fn parse_stops(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> Result<HashMap<String, StopRow>, LoadError> {
    let content = read_file(archive, "stops.txt")?;
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let id_col = require_column(&headers, "stop_id", "stops.txt")?;
    let name_col = column(&headers, "stop_name");
    let lat_col = require_column(&headers, "stop_lat", "stops.txt")?;
    let lon_col = require_column(&headers, "stop_lon", "stops.txt")?;

    let mut stops = HashMap::new();
    for result in reader.records() {
        let record = result?;
        let id = record.get(id_col).unwrap_or("").to_string();
        if id.is_empty() {
            continue;
        }
        let name = name_col
            .and_then(|c| record.get(c))
            .unwrap_or("")
            .to_string();
        let lat: f64 = record.get(lat_col).unwrap_or("0").trim().parse().unwrap_or(0.0);
        let lon: f64 = record.get(lon_col).unwrap_or("0").trim().parse().unwrap_or(0.0);

        stops.insert(id, StopRow { name, lat, lon });
    }

    Ok(stops)
}

fn parse_trips(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<TripRow>, LoadError> {
    let content = read_file(archive, "trips.txt")?;
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let route_col = require_column(&headers, "route_id", "trips.txt")?;
    let service_col = require_column(&headers, "service_id", "trips.txt")?;
    let trip_col = require_column(&headers, "trip_id", "trips.txt")?;
    let direction_col = column(&headers, "direction_id");

    let mut trips = Vec::new();
    for result in reader.records() {
        let record = result?;
        trips.push(TripRow {
            trip_id: record.get(trip_col).unwrap_or("").to_string(),
            route_id: record.get(route_col).unwrap_or("").to_string(),
            service_id: record.get(service_col).unwrap_or("").to_string(),
            direction_id: direction_col
                .and_then(|c| record.get(c))
                .and_then(|v| v.trim().parse().ok()),
        });
    }

    Ok(trips)
}

fn parse_stop_times(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    stops: &HashMap<String, StopRow>,
) -> Result<HashMap<String, Vec<ScheduledStop>>, LoadError> {
    let content = read_file(archive, "stop_times.txt")?;
    let mut reader = csv::Reader::from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    let trip_col = require_column(&headers, "trip_id", "stop_times.txt")?;
    let arrival_col = require_column(&headers, "arrival_time", "stop_times.txt")?;
    let departure_col = column(&headers, "departure_time");
    let stop_col = require_column(&headers, "stop_id", "stop_times.txt")?;
    let sequence_col = require_column(&headers, "stop_sequence", "stop_times.txt")?;
    let pickup_col = column(&headers, "pickup_type");
    let drop_off_col = column(&headers, "drop_off_type");

    let mut by_trip: HashMap<String, Vec<ScheduledStop>> = HashMap::new();

    for result in reader.records() {
        let record = result?;
        let trip_id = record.get(trip_col).unwrap_or("").to_string();
        let stop_id = record.get(stop_col).unwrap_or("").to_string();

        let Some(stop) = stops.get(&stop_id) else {
            log::warn!("stop_times.txt references unknown stop {stop_id}, skipping row");
            continue;
        };

        let arrival_secs =
            parse_time_to_secs(record.get(arrival_col).unwrap_or("")).unwrap_or(0);
        let departure_secs = departure_col
            .and_then(|c| record.get(c))
            .and_then(parse_time_to_secs)
            .unwrap_or(arrival_secs);
        let sequence: u32 = record
            .get(sequence_col)
            .unwrap_or("0")
            .trim()
            .parse()
            .unwrap_or(0);

        let field_is_one = |col: Option<usize>| {
            col.and_then(|c| record.get(c)).map(str::trim) == Some("1")
        };
        let skipped = field_is_one(pickup_col) && field_is_one(drop_off_col);

        by_trip.entry(trip_id).or_default().push(ScheduledStop {
            stop_id,
            stop_name: stop.name.clone(),
            sequence,
            arrival_secs,
            departure_secs,
            lat: stop.lat,
            lon: stop.lon,
            skipped,
        });
    }

    for times in by_trip.values_mut() {
        times.sort_by_key(|st| st.sequence);
    }

    Ok(by_trip)
}

fn parse_time_to_secs(time_str: &str) -> Option<u32> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() >= 2 {
        let hours: u32 = parts[0].parse().ok()?;
        let mins: u32 = parts[1].parse().ok()?;
        let secs: u32 = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        Some(hours * 3600 + mins * 60 + secs)
    } else {
        None
    }
}
