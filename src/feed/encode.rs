//! The only module that touches gtfs_realtime wire types. The matching
//! core hands over plain records; field numbers, enum values and
//! optionality all belong to the externally specified schema.

use crate::matcher::records::{
    AlertRecord, StopRelationship, StopStatus, TripRef, TripUpdateRecord, VehiclePositionRecord,
};
use gtfs_realtime::{FeedEntity, FeedHeader, FeedMessage};
use prost::Message;
use std::path::{Path, PathBuf};

fn feed_with_header(timestamp: u64) -> FeedMessage {
    let mut feed = FeedMessage::default();
    let mut header = FeedHeader::default();
    header.gtfs_realtime_version = "2.0".to_string();
    header.incrementality = Some(0); // FULL_DATASET
    header.timestamp = Some(timestamp);
    feed.header = header;
    feed
}

fn empty_entity(id: String) -> FeedEntity {
    let mut entity = FeedEntity::default();
    entity.id = id;
    entity
}

fn trip_descriptor(trip_ref: &TripRef) -> gtfs_realtime::TripDescriptor {
    let mut trip = gtfs_realtime::TripDescriptor::default();
    trip.trip_id = Some(trip_ref.trip_id.clone());
    trip.route_id = Some(trip_ref.route_id.clone());
    trip.direction_id = trip_ref.direction_id;
    trip.start_date = Some(trip_ref.start_date.clone());
    trip
}

fn stop_status_value(status: StopStatus) -> i32 {
    use gtfs_realtime::vehicle_position::VehicleStopStatus;
    match status {
        StopStatus::IncomingAt => VehicleStopStatus::IncomingAt as i32,
        StopStatus::StoppedAt => VehicleStopStatus::StoppedAt as i32,
        StopStatus::InTransitTo => VehicleStopStatus::InTransitTo as i32,
    }
}

pub fn vehicle_positions_feed(
    records: &[VehiclePositionRecord],
    timestamp: u64,
) -> FeedMessage {
    let mut feed = feed_with_header(timestamp);

    for record in records {
        let mut vehicle = gtfs_realtime::VehiclePosition::default();

        vehicle.trip = record.trip.as_ref().map(trip_descriptor);
        vehicle.vehicle = Some(gtfs_realtime::VehicleDescriptor {
            id: Some(record.vehicle_id.clone()),
            label: Some(record.vehicle_id.clone()),
            ..Default::default()
        });
        vehicle.position = Some(gtfs_realtime::Position {
            latitude: record.lat as f32,
            longitude: record.lon as f32,
            bearing: record.bearing,
            speed: record.speed_mps,
            ..Default::default()
        });
        vehicle.current_stop_sequence = record.stop_sequence;
        vehicle.stop_id = record.stop_id.clone();
        vehicle.current_status = record.status.map(stop_status_value);
        vehicle.timestamp = Some(record.timestamp);

        let mut entity = empty_entity(format!("vp-{}", record.vehicle_id));
        entity.vehicle = Some(vehicle);
        feed.entity.push(entity);
    }

    feed
}

pub fn trip_updates_feed(records: &[TripUpdateRecord], timestamp: u64) -> FeedMessage {
    use gtfs_realtime::trip_update::stop_time_update::ScheduleRelationship;
    use gtfs_realtime::trip_update::{StopTimeEvent, StopTimeUpdate};

    let mut feed = feed_with_header(timestamp);

    for record in records {
        let mut trip_update = gtfs_realtime::TripUpdate::default();
        trip_update.trip = trip_descriptor(&record.trip);
        trip_update.vehicle = Some(gtfs_realtime::VehicleDescriptor {
            id: Some(record.vehicle_id.clone()),
            ..Default::default()
        });
        trip_update.timestamp = Some(record.timestamp);
        trip_update.delay = Some(record.delay_secs);

        for stu_record in &record.stop_time_updates {
            let mut stu = StopTimeUpdate::default();
            stu.stop_sequence = Some(stu_record.stop_sequence);
            stu.stop_id = Some(stu_record.stop_id.clone());

            let mut arrival = StopTimeEvent::default();
            arrival.time = Some(stu_record.arrival_time);
            arrival.delay = Some(stu_record.delay_secs);
            stu.arrival = Some(arrival);

            let mut departure = StopTimeEvent::default();
            departure.time = Some(stu_record.departure_time);
            departure.delay = Some(stu_record.delay_secs);
            stu.departure = Some(departure);

            stu.schedule_relationship = Some(match stu_record.relationship {
                StopRelationship::Scheduled => ScheduleRelationship::Scheduled as i32,
                StopRelationship::Skipped => ScheduleRelationship::Skipped as i32,
            });

            trip_update.stop_time_update.push(stu);
        }

        let mut entity = empty_entity(format!("tu-{}", record.vehicle_id));
        entity.trip_update = Some(trip_update);
        feed.entity.push(entity);
    }

    feed
}

pub fn service_alerts_feed(records: &[AlertRecord], timestamp: u64) -> FeedMessage {
    let mut feed = feed_with_header(timestamp);

    for record in records {
        let mut entity = empty_entity(format!("alert-{}", record.id));
        entity.alert = Some(record.alert.clone());
        feed.entity.push(entity);
    }

    feed
}

/// Write a feed to `<dir>/<kind>.pb`, replacing the previous snapshot.
pub fn write_feed_file(dir: &Path, kind: &str, feed: &FeedMessage) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{kind}.pb"));
    let mut buf = Vec::new();
    feed.encode(&mut buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, buf)?;
    Ok(path)
}
