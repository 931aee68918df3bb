//! Persistence collaborator
//!
//! The engine only talks to storage through [`TicketStore`]. Filtered counts
//! back the auto-completion check; the compare-and-set stamp methods close
//! the check-then-act race between two near-simultaneous driver marks.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Ticket, TicketAssignment, Trip, TripStatus, Vehicle, VehiclePosition};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Update targeted a record that was never inserted
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: Uuid },
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Compound trip filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct TripFilter {
    pub ticket_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub status: Option<TripStatus>,
    /// Only trips lacking an exit timestamp or an exit event reference
    pub incomplete_only: bool,
    /// Only trips whose exit volume magnitude exceeds this tolerance
    pub exit_volume_above: Option<f64>,
}

impl TripFilter {
    pub fn for_ticket(ticket_id: Uuid) -> Self {
        Self {
            ticket_id: Some(ticket_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        if self.ticket_id.is_some() && trip.ticket_id != self.ticket_id {
            return false;
        }
        if self.assignment_id.is_some() && trip.assignment_id != self.assignment_id {
            return false;
        }
        if let Some(status) = self.status {
            if trip.status != status {
                return false;
            }
        }
        if self.incomplete_only && !trip.is_incomplete() {
            return false;
        }
        if let Some(tolerance) = self.exit_volume_above {
            if !trip.exit_volume_exceeds(tolerance) {
                return false;
            }
        }
        true
    }
}

/// Compound assignment filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub ticket_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub active: Option<bool>,
    /// Keep only assignments that still block ticket completion
    pub outstanding_only: bool,
}

impl AssignmentFilter {
    pub fn for_ticket(ticket_id: Uuid) -> Self {
        Self {
            ticket_id: Some(ticket_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, assignment: &TicketAssignment) -> bool {
        if let Some(ticket_id) = self.ticket_id {
            if assignment.ticket_id != ticket_id {
                return false;
            }
        }
        if let Some(driver_id) = self.driver_id {
            if assignment.driver_id != driver_id {
                return false;
            }
        }
        if let Some(vehicle_id) = self.vehicle_id {
            if assignment.vehicle_id != vehicle_id {
                return false;
            }
        }
        if let Some(active) = self.active {
            if assignment.is_active != active {
                return false;
            }
        }
        !self.outstanding_only || assignment.is_outstanding()
    }
}

/// Storage for tickets, assignments, trips and fleet data
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()>;
    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;
    /// Replace an existing ticket; fails with [`StoreError::Missing`] otherwise.
    async fn update_ticket(&self, ticket: &Ticket) -> StoreResult<()>;

    async fn insert_assignment(&self, assignment: TicketAssignment) -> StoreResult<()>;
    async fn assignment(&self, id: Uuid) -> StoreResult<Option<TicketAssignment>>;
    async fn update_assignment(&self, assignment: &TicketAssignment) -> StoreResult<()>;
    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
    ) -> StoreResult<Vec<TicketAssignment>>;
    async fn count_assignments(&self, filter: &AssignmentFilter) -> StoreResult<usize>;

    /// Stamp `trip_started_at` only if it is still unset.
    ///
    /// Returns the updated assignment, or `None` when another caller stamped
    /// it first.
    async fn start_assignment_trip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<TicketAssignment>>;

    /// Stamp `trip_finished_at` only if the trip is started and not yet finished.
    async fn finish_assignment_trip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<TicketAssignment>>;

    async fn insert_trip(&self, trip: Trip) -> StoreResult<()>;
    async fn trip(&self, id: Uuid) -> StoreResult<Option<Trip>>;
    async fn update_trip(&self, trip: &Trip) -> StoreResult<()>;
    async fn list_trips(&self, filter: &TripFilter) -> StoreResult<Vec<Trip>>;
    async fn count_trips(&self, filter: &TripFilter) -> StoreResult<usize>;

    async fn insert_vehicle(&self, vehicle: Vehicle) -> StoreResult<()>;
    async fn vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>>;

    /// Keep the fix if it is newer than the stored one.
    async fn record_position(&self, position: VehiclePosition) -> StoreResult<()>;
    async fn last_position(&self, vehicle_id: Uuid) -> StoreResult<Option<VehiclePosition>>;

    /// Active assignment currently held by a driver, if any.
    async fn active_assignment_for_driver(
        &self,
        driver_id: Uuid,
    ) -> StoreResult<Option<TicketAssignment>> {
        let filter = AssignmentFilter {
            driver_id: Some(driver_id),
            active: Some(true),
            ..Default::default()
        };
        Ok(self.list_assignments(&filter).await?.into_iter().next())
    }

    /// Active assignment currently holding a vehicle, if any.
    async fn active_assignment_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> StoreResult<Option<TicketAssignment>> {
        let filter = AssignmentFilter {
            vehicle_id: Some(vehicle_id),
            active: Some(true),
            ..Default::default()
        };
        Ok(self.list_assignments(&filter).await?.into_iter().next())
    }

    /// Trip already recorded against an assignment, if any.
    async fn trip_for_assignment(&self, assignment_id: Uuid) -> StoreResult<Option<Trip>> {
        let filter = TripFilter {
            assignment_id: Some(assignment_id),
            ..Default::default()
        };
        Ok(self.list_trips(&filter).await?.into_iter().next())
    }
}
