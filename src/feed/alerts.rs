//! Service alerts are authored outside this system and dropped in as a
//! JSON file; this module only converts them to wire shape. No alert
//! content is generated or modified here.

use crate::matcher::records::AlertRecord;
use gtfs_realtime::translated_string::Translation;
use gtfs_realtime::{EntitySelector, TimeRange, TranslatedString};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct AuthoredAlert {
    pub id: String,
    pub header: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Active period, unix seconds. Absent bounds mean open-ended.
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub stops: Vec<String>,
    /// gtfs-realtime Cause enum value, verbatim.
    #[serde(default = "default_cause")]
    pub cause: i32,
    /// gtfs-realtime Effect enum value, verbatim.
    #[serde(default = "default_effect")]
    pub effect: i32,
}

fn default_cause() -> i32 {
    gtfs_realtime::alert::Cause::UnknownCause as i32
}

fn default_effect() -> i32 {
    gtfs_realtime::alert::Effect::UnknownEffect as i32
}

pub fn load_alerts(path: &Path) -> Result<Vec<AlertRecord>, Box<dyn std::error::Error + Send + Sync>> {
    let content = std::fs::read_to_string(path)?;
    let authored: Vec<AuthoredAlert> = serde_json::from_str(&content)?;
    Ok(authored.into_iter().map(to_record).collect())
}

fn translated(text: &str) -> TranslatedString {
    TranslatedString {
        translation: vec![Translation {
            text: text.to_string(),
            language: None,
        }],
    }
}

fn to_record(authored: AuthoredAlert) -> AlertRecord {
    let mut alert = gtfs_realtime::Alert::default();

    alert.header_text = Some(translated(&authored.header));
    if let Some(description) = &authored.description {
        alert.description_text = Some(translated(description));
    }

    if authored.start.is_some() || authored.end.is_some() {
        alert.active_period.push(TimeRange {
            start: authored.start,
            end: authored.end,
        });
    }

    for route_id in &authored.routes {
        alert.informed_entity.push(EntitySelector {
            route_id: Some(route_id.clone()),
            ..Default::default()
        });
    }
    for stop_id in &authored.stops {
        alert.informed_entity.push(EntitySelector {
            stop_id: Some(stop_id.clone()),
            ..Default::default()
        });
    }

    alert.cause = Some(authored.cause);
    alert.effect = Some(authored.effect);

    AlertRecord {
        id: authored.id,
        alert,
    }
}
