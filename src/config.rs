use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;

/// Matching thresholds. Every value here is a tuning knob with no single
/// authoritative default, so all of them can be overridden from the JSON
/// config file passed on the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Distance below which a vehicle is considered stopped at a stop.
    pub at_stop_radius_m: f64,
    /// Distance below which a vehicle is considered approaching a stop.
    /// Beyond this radius for every active stop, the fix is unmatched.
    pub approach_radius_m: f64,
    /// Nearest-stop distance beyond which the continuity bias toward the
    /// previously assigned trip is abandoned and candidates are re-opened.
    pub deviation_radius_m: f64,
    /// Two stops closer together than this are a tie; the later sequence
    /// index wins.
    pub tie_epsilon_m: f64,
    /// Forward search window from the previous stop index, in stops.
    pub lookahead_stops: usize,
    /// How many stops the matched index may move backward on the same trip
    /// before the transition is rejected.
    pub backward_slack_stops: u32,
    /// A delay sample further than this from the previous smoothed delay is
    /// treated as a sensor anomaly and discarded.
    pub max_delay_jump_secs: i32,
    /// Speed above which a vehicle counts as moving when classifying
    /// INCOMING_AT.
    pub min_motion_speed_mps: f32,
    /// A trip is active from this long before its first scheduled arrival...
    pub activity_pre_slack_secs: u32,
    /// ...until this long after its last scheduled arrival.
    pub activity_post_slack_secs: u32,
    /// Agency timezone; all service-day arithmetic happens in it.
    pub timezone: Tz,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            at_stop_radius_m: 35.0,
            approach_radius_m: 150.0,
            deviation_radius_m: 400.0,
            tie_epsilon_m: 10.0,
            lookahead_stops: 8,
            backward_slack_stops: 1,
            max_delay_jump_secs: 300,
            min_motion_speed_mps: 1.0,
            activity_pre_slack_secs: 1800,
            activity_post_slack_secs: 3600,
            timezone: chrono_tz::America::Los_Angeles,
        }
    }
}

impl MatcherConfig {
    /// Read the config file, falling back to defaults when it is absent.
    /// A present but malformed file is an error; silently matching with the
    /// wrong radii is worse than refusing to start.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}
