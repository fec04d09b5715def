//! The polling driver. All timing lives here, outside the matching core:
//! each tick fetches the latest fixes, runs one reconciliation cycle per
//! vehicle against the current schedule snapshot, and swaps the encoded
//! feeds for the HTTP server to serve.

use crate::feed::{alerts, encode};
use crate::gtfs::{loader, GpsFix};
use crate::matcher::records::AlertRecord;
use crate::matcher::{Reconciler, ScheduleIndex, VehicleRegistry};
use gtfs_realtime::FeedMessage;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

pub type SharedFeed = Arc<RwLock<Option<FeedMessage>>>;
/// Snapshot-swapped schedule: readers clone the inner Arc and keep using
/// their snapshot even while the refresh task installs a new one.
pub type SharedIndex = Arc<RwLock<Arc<ScheduleIndex>>>;

#[derive(Debug, Clone, Default)]
pub struct Feeds {
    pub vehicle_positions: SharedFeed,
    pub trip_updates: SharedFeed,
    pub service_alerts: SharedFeed,
}

impl Feeds {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub gps_url: String,
    pub poll_interval: Duration,
    pub alerts_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub state_path: PathBuf,
}

/// Ticks the vehicle registry should be saved after.
const STATE_SAVE_EVERY_TICKS: u64 = 30;

pub async fn run_poller(
    engine: Reconciler,
    index: SharedIndex,
    registry: Arc<RwLock<VehicleRegistry>>,
    feeds: Feeds,
    opts: PollerOptions,
) {
    log::info!(
        "Starting GPS poller against {} every {:?}",
        opts.gps_url,
        opts.poll_interval
    );
    let client = reqwest::Client::new();

    let mut tick_count: u64 = 0;

    loop {
        match tick(&client, &engine, &index, &registry, &feeds, &opts).await {
            Ok(count) => log::debug!("Reconciled {count} vehicles"),
            Err(e) => log::warn!("Polling tick failed: {e}"),
        }

        tick_count += 1;
        if tick_count % STATE_SAVE_EVERY_TICKS == 0 {
            let registry = registry.read().await;
            if let Err(e) = registry.save(&opts.state_path) {
                log::warn!("Failed to save vehicle state: {e}");
            }
        }

        tokio::time::sleep(opts.poll_interval).await;
    }
}

async fn tick(
    client: &reqwest::Client,
    engine: &Reconciler,
    index: &SharedIndex,
    registry: &RwLock<VehicleRegistry>,
    feeds: &Feeds,
    opts: &PollerOptions,
) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    // Cycles started during a schedule refresh keep this snapshot.
    let snapshot = index.read().await.clone();

    let body = client
        .get(&opts.gps_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let fixes = parse_fixes(&body, now)?;
    let alert_records = current_alerts(opts);

    let mut positions = Vec::with_capacity(fixes.len());
    let mut trip_updates = Vec::new();
    let mut reconciled = 0;

    {
        // One write lock for the whole pass serializes cycles per vehicle.
        let mut registry = registry.write().await;

        for fix in fixes {
            let prior = registry.get_or_create(&fix.vehicle_id).clone();

            if fix.timestamp < prior.last_update {
                log::debug!(
                    "Vehicle {} fix at {} is older than state at {}, dropping",
                    fix.vehicle_id,
                    fix.timestamp,
                    prior.last_update
                );
                continue;
            }

            match engine.reconcile(&fix, &snapshot, &prior, &alert_records) {
                Ok(output) => {
                    registry.insert(output.state);
                    positions.push(output.position);
                    trip_updates.extend(output.trip_update);
                    reconciled += 1;
                }
                Err(e) => {
                    // Prior state stays untouched; the next tick retries
                    // with fresh input.
                    log::warn!("Vehicle {} cycle skipped: {e}", fix.vehicle_id);
                }
            }
        }
    }

    let vp_feed = encode::vehicle_positions_feed(&positions, now);
    let tu_feed = encode::trip_updates_feed(&trip_updates, now);
    let alerts_feed = encode::service_alerts_feed(&alert_records, now);

    if let Some(dir) = &opts.output_dir {
        for (kind, feed) in [
            ("vehicle_positions", &vp_feed),
            ("trip_updates", &tu_feed),
            ("service_alerts", &alerts_feed),
        ] {
            if let Err(e) = encode::write_feed_file(dir, kind, feed) {
                log::warn!("Failed to write {kind} feed to {}: {e}", dir.display());
            }
        }
    }

    *feeds.vehicle_positions.write().await = Some(vp_feed);
    *feeds.trip_updates.write().await = Some(tu_feed);
    *feeds.service_alerts.write().await = Some(alerts_feed);

    Ok(reconciled)
}

fn current_alerts(opts: &PollerOptions) -> Vec<AlertRecord> {
    let Some(path) = &opts.alerts_path else {
        return Vec::new();
    };
    if !path.exists() {
        return Vec::new();
    }
    match alerts::load_alerts(path) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("Failed to read alerts from {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Periodically re-download the static schedule and atomically swap in a
/// freshly built index. Any failure keeps the previous snapshot serving.
pub async fn run_schedule_refresh(gtfs_url: String, interval: Duration, index: SharedIndex) {
    loop {
        tokio::time::sleep(interval).await;

        let trips = match loader::load_static_schedule(&gtfs_url).await {
            Ok(trips) => trips,
            Err(e) => {
                log::warn!("Schedule refresh download failed, keeping current index: {e}");
                continue;
            }
        };

        match ScheduleIndex::build(trips) {
            Ok(new_index) => {
                let trip_count = new_index.trip_count();
                *index.write().await = Arc::new(new_index);
                log::info!("Schedule refreshed, {trip_count} trips indexed");
            }
            Err(e) => {
                log::warn!("Schedule refresh rejected, keeping current index: {e}");
            }
        }
    }
}

/// GPS logger payloads are loosely typed: a single object or an array,
/// ids as strings or numbers, coordinate keys in long or short form.
#[derive(Debug, Deserialize)]
struct RawFix {
    #[serde(alias = "vehicle_id")]
    device_id: IdValue,
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
    #[serde(default, alias = "time")]
    timestamp: Option<u64>,
    #[serde(default)]
    speed: Option<f32>,
    #[serde(default)]
    bearing: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(i64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Text(s) => s,
            IdValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RawFix>),
    One(RawFix),
}

fn parse_fixes(body: &str, now: u64) -> Result<Vec<GpsFix>, serde_json::Error> {
    let parsed: OneOrMany = serde_json::from_str(body)?;
    let raw = match parsed {
        OneOrMany::Many(fixes) => fixes,
        OneOrMany::One(fix) => vec![fix],
    };

    Ok(raw
        .into_iter()
        .map(|r| GpsFix {
            vehicle_id: r.device_id.into_string(),
            timestamp: r.timestamp.unwrap_or(now),
            lat: r.latitude,
            lon: r.longitude,
            speed_mps: r.speed,
            bearing: r.bearing,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_object_with_numeric_id() {
        let body = r#"{"device_id": 42, "latitude": 33.65, "longitude": -117.73}"#;
        let fixes = parse_fixes(body, 1000).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].vehicle_id, "42");
        // Missing timestamp falls back to the poll time.
        assert_eq!(fixes[0].timestamp, 1000);
    }

    #[test]
    fn parses_array_with_short_keys() {
        let body = r#"[
            {"vehicle_id": "bus-1", "lat": 33.65, "lon": -117.73, "time": 500, "speed": 7.5},
            {"vehicle_id": "bus-2", "lat": 33.66, "lon": -117.74, "bearing": 180.0}
        ]"#;
        let fixes = parse_fixes(body, 1000).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].timestamp, 500);
        assert_eq!(fixes[0].speed_mps, Some(7.5));
        assert_eq!(fixes[1].bearing, Some(180.0));
    }

    #[test]
    fn rejects_unusable_payload() {
        assert!(parse_fixes("not json", 1000).is_err());
        assert!(parse_fixes(r#"{"error": "gps offline"}"#, 1000).is_err());
    }
}
