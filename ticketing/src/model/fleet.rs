//! Vehicles and their last known GPS fixes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Vehicle master record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub contractor_id: Uuid,
    pub plate_number: String,
    /// Nominal body capacity, used for load plausibility
    pub body_volume_m3: Option<f64>,
}

/// A single GPS fix, already tagged against the relevant geofences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
    pub inside_cleaning_area: bool,
    /// Inside the disposal polygon
    pub inside_polygon: bool,
}
