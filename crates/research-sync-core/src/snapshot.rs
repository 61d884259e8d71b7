//! Progress snapshot
//!
//! The authoritative progress record of one research session at one point in
//! time. Both transports decode through [`Snapshot::from_json`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SyncError};

/// Status label the server uses for a finished session
pub const STATUS_COMPLETED: &str = "completed";

/// Timestamps below this are taken as seconds since the epoch, above as ms.
const SECONDS_CUTOFF: f64 = 1e11;

/// A source collected by the research task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSource {
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Full progress record for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    /// Short machine label ("running", "completed", "error")
    pub status: String,
    /// Current stage name
    pub step: String,
    pub step_number: u32,
    pub total_steps: u32,
    /// Display value in `[0, 100]`; not monotonic
    #[serde(deserialize_with = "clamped_percentage")]
    pub percentage: f64,
    pub search_queries: Vec<String>,
    pub sources: Vec<ProgressSource>,
    pub status_updates: Vec<String>,
    /// Session creation time (Unix seconds or milliseconds)
    pub start_time: f64,
    pub complete: bool,
}

fn clamped_percentage<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    Ok(clamp_percentage(value))
}

pub(crate) fn clamp_percentage(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

impl Snapshot {
    /// Decode one wire payload
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(SyncError::decode)
    }

    /// True once the session has finished; nothing more should be fetched
    /// or applied after a terminal snapshot.
    pub fn is_terminal(&self) -> bool {
        self.complete || self.status == STATUS_COMPLETED
    }

    /// Session start in milliseconds since the epoch
    pub fn start_time_ms(&self) -> i64 {
        if self.start_time < SECONDS_CUTOFF {
            (self.start_time * 1000.0) as i64
        } else {
            self.start_time as i64
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.start_time_ms()).single()
    }

    /// Milliseconds since the session started, never negative
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = now.timestamp_millis().saturating_sub(self.start_time_ms());
        elapsed.max(0) as u64
    }
}
