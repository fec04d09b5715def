mod api;
mod config;
mod error;
mod feed;
mod gtfs;
mod matcher;
mod realtime;

use clap::Parser;
use config::MatcherConfig;
use matcher::{Reconciler, ScheduleIndex, VehicleRegistry};
use realtime::poller::{self, Feeds, PollerOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "avl-realtime-gtfs")]
#[command(about = "Reconciles AVL/GPS fixes against a static GTFS schedule and serves GTFS-RT feeds")]
struct Args {
    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "8080")]
    port: u16,

    /// GPS logger endpoint returning the latest fixes as JSON
    #[arg(long, env = "GPS_LOGGER_URL")]
    gps_url: String,

    /// Static GTFS zip to download and index
    #[arg(long, env = "GTFS_STATIC_URL")]
    gtfs_url: String,

    /// Matching thresholds config file (JSON); defaults apply when absent
    #[arg(long, env = "MATCHER_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Externally authored service alerts file (JSON), forwarded verbatim
    #[arg(long, env = "SERVICE_ALERTS_PATH")]
    alerts: Option<PathBuf>,

    /// Directory to also write each generated feed as a .pb file
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Vehicle state snapshot file, restored on startup
    #[arg(long, env = "STATE_PATH", default_value = "vehicle_state.json")]
    state_path: PathBuf,

    /// How often to poll the GPS endpoint, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "30000")]
    poll_interval_ms: u64,

    /// How often to re-download the static schedule, in seconds
    #[arg(long, env = "SCHEDULE_REFRESH_SECS", default_value = "86400")]
    schedule_refresh_secs: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let cfg = match MatcherConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Failed to load config {}: {e}", args.config.display());
            return;
        }
    };

    let trips = match gtfs::loader::load_static_schedule(&args.gtfs_url).await {
        Ok(trips) => trips,
        Err(e) => {
            log::error!("Failed to load static GTFS: {e}");
            return;
        }
    };
    let index = match ScheduleIndex::build(trips) {
        Ok(index) => index,
        Err(e) => {
            log::error!("Static GTFS rejected: {e}");
            return;
        }
    };
    log::info!("Indexed {} trips", index.trip_count());

    let registry = if args.state_path.exists() {
        match VehicleRegistry::load(&args.state_path) {
            Ok(registry) => {
                log::info!("Restored {} vehicle states", registry.len());
                registry
            }
            Err(e) => {
                log::warn!("Could not restore vehicle state, starting fresh: {e}");
                VehicleRegistry::new()
            }
        }
    } else {
        VehicleRegistry::new()
    };

    let shared_index: poller::SharedIndex = Arc::new(RwLock::new(Arc::new(index)));
    let registry = Arc::new(RwLock::new(registry));
    let feeds = Feeds::new();

    let refresh_handle = tokio::spawn(poller::run_schedule_refresh(
        args.gtfs_url.clone(),
        Duration::from_secs(args.schedule_refresh_secs),
        shared_index.clone(),
    ));

    let poller_handle = tokio::spawn(poller::run_poller(
        Reconciler::new(cfg),
        shared_index.clone(),
        registry,
        feeds.clone(),
        PollerOptions {
            gps_url: args.gps_url,
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            alerts_path: args.alerts,
            output_dir: args.output_dir,
            state_path: args.state_path,
        },
    ));

    let api_handle = tokio::spawn(api::server::run_server(feeds, args.port));

    tokio::select! {
        _ = refresh_handle => log::error!("Schedule refresh task exited"),
        _ = poller_handle => log::error!("Poller task exited"),
        _ = api_handle => log::error!("API server exited"),
    }
}
