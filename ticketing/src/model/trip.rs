//! Vehicle passes through monitored areas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compliance status of a trip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    #[default]
    Ok,
    RouteViolation,
    ForeignArea,
    MismatchPlate,
    OverCapacity,
    NoAreaWork,
    NoAssignment,
    SuspiciousVolume,
    NoExitCamera,
    OverContractLimit,
}

impl TripStatus {
    pub fn is_violation(self) -> bool {
        self != Self::Ok
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::RouteViolation => "ROUTE_VIOLATION",
            Self::ForeignArea => "FOREIGN_AREA",
            Self::MismatchPlate => "MISMATCH_PLATE",
            Self::OverCapacity => "OVER_CAPACITY",
            Self::NoAreaWork => "NO_AREA_WORK",
            Self::NoAssignment => "NO_ASSIGNMENT",
            Self::SuspiciousVolume => "SUSPICIOUS_VOLUME",
            Self::NoExitCamera => "NO_EXIT_CAMERA",
            Self::OverContractLimit => "OVER_CONTRACT_LIMIT",
        };
        write!(f, "{}", s)
    }
}

/// One vehicle pass, entry to exit.
///
/// A trip without `exit_at` is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    /// Vehicle the detected plate resolved to, when it resolved at all
    #[serde(default)]
    pub detected_vehicle_id: Option<Uuid>,
    pub vehicle_body_volume_m3: Option<f64>,
    pub camera_id: Option<Uuid>,
    pub polygon_id: Option<Uuid>,
    /// Plate the trip was expected to carry
    #[serde(default)]
    pub vehicle_plate_number: String,
    /// Plate read by the camera
    #[serde(default)]
    pub detected_plate_number: String,
    pub entry_lpr_event_id: Option<Uuid>,
    pub exit_lpr_event_id: Option<Uuid>,
    pub entry_volume_event_id: Option<Uuid>,
    pub exit_volume_event_id: Option<Uuid>,
    pub detected_volume_entry: Option<f64>,
    pub detected_volume_exit: Option<f64>,
    /// Carried volume computed by reconciliation
    pub total_volume_m3: Option<f64>,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub status: TripStatus,
    /// Base status supplied by the reporter, re-used when the trip is re-classified
    #[serde(default)]
    pub reported_status: TripStatus,
    pub violation_reason: Option<String>,
    /// Created or last updated from a driver report rather than sensors
    #[serde(default)]
    pub reconciled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// An open trip with no links, entering at `entry_at`.
    pub fn entering(entry_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticket_id: None,
            assignment_id: None,
            driver_id: None,
            vehicle_id: None,
            detected_vehicle_id: None,
            vehicle_body_volume_m3: None,
            camera_id: None,
            polygon_id: None,
            vehicle_plate_number: String::new(),
            detected_plate_number: String::new(),
            entry_lpr_event_id: None,
            exit_lpr_event_id: None,
            entry_volume_event_id: None,
            exit_volume_event_id: None,
            detected_volume_entry: None,
            detected_volume_exit: None,
            total_volume_m3: None,
            entry_at,
            exit_at: None,
            status: TripStatus::Ok,
            reported_status: TripStatus::Ok,
            violation_reason: None,
            reconciled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit_at.is_none()
    }

    /// Missing an exit timestamp or either exit sensor-event reference.
    pub fn is_incomplete(&self) -> bool {
        self.exit_at.is_none()
            || self.exit_lpr_event_id.is_none()
            || self.exit_volume_event_id.is_none()
    }

    /// Body was not empty on exit.
    pub fn exit_volume_exceeds(&self, tolerance: f64) -> bool {
        self.detected_volume_exit
            .map(|v| v.abs() > tolerance)
            .unwrap_or(false)
    }

    /// Volume credited to this trip: reconciled total, else the entry reading.
    pub fn credited_volume(&self) -> f64 {
        self.total_volume_m3
            .or(self.detected_volume_entry)
            .unwrap_or(0.0)
    }
}
