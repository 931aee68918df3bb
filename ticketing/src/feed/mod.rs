//! Plate-recognition / volume sensor feed
//!
//! The feed reports camera detections with an optional per-event load volume.
//! Reconciliation only needs entry-direction events for one plate within a
//! driving window, so that is the single query this module exposes.

mod client;
mod health;
mod retry;

pub use client::HttpSensorFeed;
pub use health::{DegradationLevel, FeedHealth};
pub use retry::{fetch_with_retry, RetryPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for feed calls
pub type FeedResult<T> = Result<T, FeedError>;

/// Sensor feed failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeedError {
    #[error("Sensor feed is not configured")]
    NotConfigured,

    #[error("Plate '{0}' is empty after normalization")]
    InvalidPlate(String),

    /// Connection failures and request timeouts
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Feed returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Failed to decode feed response: {0}")]
    Decode(String),

    #[error("Feed query cancelled")]
    Cancelled,
}

impl FeedError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Event direction relative to the monitored area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entry,
    Exit,
    #[serde(other)]
    Unknown,
}

/// One detection as reported by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateEvent {
    pub id: Uuid,
    #[serde(rename = "normalized_plate")]
    pub plate: String,
    #[serde(rename = "event_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Load volume measured at the gate, when a volume sensor is present
    #[serde(rename = "snow_volume_m3", default)]
    pub volume_m3: Option<f64>,
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub polygon_id: Option<String>,
}

impl PlateEvent {
    /// Entry events, plus events the feed did not tag with a direction.
    pub fn counts_as_entry(&self) -> bool {
        matches!(self.direction, None | Some(Direction::Entry))
    }
}

/// Entry-event query for one plate in a closed time window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Already normalized
    pub plate: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EventQuery {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Source of entry events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorFeed: Send + Sync {
    /// Entry-direction events for `query.plate` within `[start, end]`.
    async fn entry_events(&self, query: &EventQuery) -> FeedResult<Vec<PlateEvent>>;
}
