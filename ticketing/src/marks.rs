//! Assignment management and driver progress marks
//!
//! A driver reports an assignment in two steps: in-work, then completed.
//! Each step stamps one end of the driving window exactly once. The stamps
//! go through the store's compare-and-set methods, so of two racing marks
//! only one wins and the other sees a `Conflict`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{TicketError, TicketResult};
use crate::lifecycle::{AutoComplete, TicketLifecycle};
use crate::model::{Principal, Role, Ticket, TicketAssignment};
use crate::reconcile::{Reconciliation, VolumeReconciler};
use crate::store::TicketStore;

/// Result of a completed mark
#[derive(Debug, Clone, Serialize)]
pub struct CompletedMark {
    pub assignment: TicketAssignment,
    /// `None` when reconciliation failed; the failure is logged
    pub reconciliation: Option<Reconciliation>,
    pub auto_complete: AutoComplete,
}

/// Owns assignment state: creation, soft deletion and driver marks
pub struct MarkTracker {
    store: Arc<dyn TicketStore>,
    lifecycle: Arc<TicketLifecycle>,
    reconciler: Arc<VolumeReconciler>,
}

impl MarkTracker {
    pub fn new(
        store: Arc<dyn TicketStore>,
        lifecycle: Arc<TicketLifecycle>,
        reconciler: Arc<VolumeReconciler>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            reconciler,
        }
    }

    /// Bind a driver and vehicle to a ticket.
    pub async fn assign(
        &self,
        principal: &Principal,
        ticket_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        let ticket = self.lifecycle.ticket(ticket_id).await?;
        ensure_contractor(principal, &ticket)?;
        ensure_accepts_assignments(&ticket)?;

        if let Some(vehicle) = self.store.vehicle(vehicle_id).await? {
            if vehicle.contractor_id != ticket.contractor_id {
                return Err(TicketError::invalid_input(format!(
                    "vehicle {} belongs to another contractor",
                    vehicle_id
                )));
            }
        }

        let assignment = TicketAssignment::new(ticket_id, driver_id, vehicle_id);
        self.store.insert_assignment(assignment.clone()).await?;
        tracing::info!(
            assignment_id = %assignment.id,
            ticket_id = %ticket_id,
            driver_id = %driver_id,
            vehicle_id = %vehicle_id,
            "Assignment created"
        );
        Ok(assignment)
    }

    /// Soft-delete an assignment. It is never re-activated.
    pub async fn unassign(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        let mut assignment = self.assignment(assignment_id).await?;
        let ticket = self.lifecycle.ticket(assignment.ticket_id).await?;
        ensure_contractor(principal, &ticket)?;
        ensure_accepts_assignments(&ticket)?;
        if !assignment.is_active {
            return Err(TicketError::conflict(format!(
                "assignment {} is already unassigned",
                assignment_id
            )));
        }

        assignment.is_active = false;
        assignment.unassigned_at = Some(Utc::now());
        self.store.update_assignment(&assignment).await?;
        tracing::info!(assignment_id = %assignment_id, "Assignment removed");

        // The removed assignment may have been the last one outstanding
        self.lifecycle.try_auto_complete(ticket.id).await?;
        Ok(assignment)
    }

    /// Driver starts driving: stamps `trip_started_at` and may start the ticket.
    pub async fn mark_in_work(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        let (assignment, ticket) = self.markable(principal, assignment_id).await?;
        if assignment.trip_started_at.is_some() {
            return Err(TicketError::conflict(format!(
                "assignment {} is already in work",
                assignment_id
            )));
        }

        let assignment = self
            .store
            .start_assignment_trip(assignment_id, Utc::now())
            .await?
            .ok_or_else(|| {
                TicketError::conflict(format!(
                    "assignment {} was started concurrently",
                    assignment_id
                ))
            })?;
        tracing::info!(assignment_id = %assignment_id, "Driver marked in work");

        self.lifecycle.on_work_started(ticket.id).await?;
        Ok(assignment)
    }

    /// Driver finishes: stamps `trip_finished_at`, reconciles volume and
    /// re-checks ticket completion.
    ///
    /// Reconciliation failures are logged and never fail the mark.
    pub async fn mark_completed(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
        cancel: &CancellationToken,
    ) -> TicketResult<CompletedMark> {
        let (assignment, ticket) = self.markable(principal, assignment_id).await?;
        if assignment.trip_started_at.is_none() {
            return Err(TicketError::conflict(format!(
                "assignment {} was never started",
                assignment_id
            )));
        }
        if assignment.trip_finished_at.is_some() {
            return Err(TicketError::conflict(format!(
                "assignment {} is already completed",
                assignment_id
            )));
        }

        let assignment = self
            .store
            .finish_assignment_trip(assignment_id, Utc::now())
            .await?
            .ok_or_else(|| {
                TicketError::conflict(format!(
                    "assignment {} was completed concurrently",
                    assignment_id
                ))
            })?;
        tracing::info!(assignment_id = %assignment_id, "Driver marked completed");

        let reconciliation = match self.reconciler.reconcile(&assignment, cancel).await {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::error!(
                    assignment_id = %assignment_id,
                    error = %e,
                    "Reconciliation failed, mark kept"
                );
                None
            }
        };

        let auto_complete = self.lifecycle.try_auto_complete(ticket.id).await?;
        Ok(CompletedMark {
            assignment,
            reconciliation,
            auto_complete,
        })
    }

    async fn assignment(&self, id: Uuid) -> TicketResult<TicketAssignment> {
        self.store
            .assignment(id)
            .await?
            .ok_or_else(|| TicketError::not_found("assignment", id))
    }

    /// Shared checks for both marks: caller is the assigned driver, the
    /// assignment is active and the ticket still accepts work.
    async fn markable(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
    ) -> TicketResult<(TicketAssignment, Ticket)> {
        let driver_id = principal.acting_driver().ok_or_else(|| {
            TicketError::permission_denied("only drivers can report progress")
        })?;
        let assignment = self.assignment(assignment_id).await?;
        if assignment.driver_id != driver_id {
            return Err(TicketError::permission_denied(format!(
                "assignment {} belongs to another driver",
                assignment_id
            )));
        }
        if !assignment.is_active {
            return Err(TicketError::conflict(format!(
                "assignment {} was unassigned",
                assignment_id
            )));
        }

        let ticket = self.lifecycle.ticket(assignment.ticket_id).await?;
        if ticket.status.is_terminal() {
            return Err(TicketError::conflict(format!(
                "ticket {} is {}",
                ticket.id, ticket.status
            )));
        }
        Ok((assignment, ticket))
    }
}

fn ensure_contractor(principal: &Principal, ticket: &Ticket) -> TicketResult<()> {
    if principal.role != Role::Contractor || principal.org_id != ticket.contractor_id {
        return Err(TicketError::permission_denied(
            "only the ticket's contractor can manage assignments",
        ));
    }
    Ok(())
}

fn ensure_accepts_assignments(ticket: &Ticket) -> TicketResult<()> {
    if !ticket.status.accepts_assignments() {
        return Err(TicketError::conflict(format!(
            "ticket {} is {}",
            ticket.id, ticket.status
        )));
    }
    Ok(())
}
