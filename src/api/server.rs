use crate::realtime::poller::{Feeds, SharedFeed};
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prost::Message;

pub async fn run_server(feeds: Feeds, port: u16) {
    let app = Router::new()
        .route(
            "/gtfs-rt/vehicle-positions",
            get({
                let feed = feeds.vehicle_positions.clone();
                move || serve_feed(feed.clone())
            }),
        )
        .route(
            "/gtfs-rt/trip-updates",
            get({
                let feed = feeds.trip_updates.clone();
                move || serve_feed(feed.clone())
            }),
        )
        .route(
            "/gtfs-rt/service-alerts",
            get({
                let feed = feeds.service_alerts.clone();
                move || serve_feed(feed.clone())
            }),
        )
        .route("/health", get(health_check));

    let addr = format!("0.0.0.0:{port}");
    log::info!("Starting HTTP server on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {addr}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        log::error!("HTTP server exited: {e}");
    }
}

async fn serve_feed(feed: SharedFeed) -> impl IntoResponse {
    let feed_lock = feed.read().await;

    match &*feed_lock {
        Some(feed_msg) => {
            let mut buf = Vec::new();
            if feed_msg.encode(&mut buf).is_ok() {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "application/x-protobuf")],
                    buf,
                )
            } else {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "text/plain")],
                    b"Failed to encode feed".to_vec(),
                )
            }
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            b"Feed not yet available".to_vec(),
        ),
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
