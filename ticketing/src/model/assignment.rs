//! Driver/vehicle assignments on a ticket

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The driver's self-reported phase of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverMarkStatus {
    NotStarted,
    InWork,
    Completed,
}

impl std::fmt::Display for DriverMarkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::InWork => write!(f, "IN_WORK"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Binding of one driver and one vehicle to a ticket.
///
/// Assignments are never physically deleted: unassigning flips `is_active`
/// and stamps `unassigned_at`, so trips keep a valid back-reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketAssignment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_mark_status: DriverMarkStatus,
    pub assigned_at: DateTime<Utc>,
    pub unassigned_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub trip_started_at: Option<DateTime<Utc>>,
    /// Only ever set after `trip_started_at`
    pub trip_finished_at: Option<DateTime<Utc>>,
}

impl TicketAssignment {
    /// A fresh, active, not-started assignment.
    pub fn new(ticket_id: Uuid, driver_id: Uuid, vehicle_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            driver_id,
            vehicle_id,
            driver_mark_status: DriverMarkStatus::NotStarted,
            assigned_at: Utc::now(),
            unassigned_at: None,
            is_active: true,
            trip_started_at: None,
            trip_finished_at: None,
        }
    }

    /// Driving window, when both ends are stamped.
    pub fn driving_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.trip_started_at?, self.trip_finished_at?))
    }

    /// Whether this assignment still blocks ticket completion.
    pub fn is_outstanding(&self) -> bool {
        self.is_active && self.driver_mark_status != DriverMarkStatus::Completed
    }
}
