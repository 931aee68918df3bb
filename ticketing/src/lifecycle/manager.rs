use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::state::advance;
use crate::config::ComplianceThresholds;
use crate::error::{TicketError, TicketResult};
use crate::model::{NewTicket, Principal, Role, Ticket, TicketMetrics, TicketStatus};
use crate::store::{AssignmentFilter, TicketStore, TripFilter};

/// Counts of records still standing in the way of completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionBlockers {
    /// Trips lacking an exit timestamp or an exit event reference
    pub incomplete_trips: usize,
    /// Active assignments whose driver has not marked completion
    pub outstanding_assignments: usize,
    /// Trips that left with a non-empty body
    pub loaded_exits: usize,
}

impl CompletionBlockers {
    pub fn is_clear(&self) -> bool {
        self.incomplete_trips == 0 && self.outstanding_assignments == 0 && self.loaded_exits == 0
    }
}

impl fmt::Display for CompletionBlockers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} incomplete trip(s), {} outstanding assignment(s), {} loaded exit(s)",
            self.incomplete_trips, self.outstanding_assignments, self.loaded_exits
        )
    }
}

/// What an auto-completion check did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AutoComplete {
    /// Ticket moved to COMPLETED by this call
    Completed(Ticket),
    /// Ticket was already COMPLETED; nothing changed
    AlreadyCompleted,
    /// Ticket is not IN_PROGRESS; nothing changed
    NotEligible(TicketStatus),
    /// Preconditions not met yet
    Blocked(CompletionBlockers),
}

impl AutoComplete {
    pub fn completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Ticket state machine: manual transitions and the auto-completion check
pub struct TicketLifecycle {
    store: Arc<dyn TicketStore>,
    thresholds: ComplianceThresholds,
}

impl TicketLifecycle {
    pub fn new(store: Arc<dyn TicketStore>, thresholds: ComplianceThresholds) -> Self {
        Self { store, thresholds }
    }

    pub async fn ticket(&self, id: Uuid) -> TicketResult<Ticket> {
        self.store
            .ticket(id)
            .await?
            .ok_or_else(|| TicketError::not_found("ticket", id))
    }

    /// Issue a new PLANNED ticket on behalf of the caller's organization.
    pub async fn create(&self, principal: &Principal, input: NewTicket) -> TicketResult<Ticket> {
        if principal.role != Role::Issuer {
            return Err(TicketError::permission_denied(
                "only the issuing organization can create tickets",
            ));
        }
        if input.planned_end_at <= input.planned_start_at {
            return Err(TicketError::invalid_input(
                "planned_end_at must be after planned_start_at",
            ));
        }

        let ticket = Ticket::planned(input, principal.org_id);
        self.store.insert_ticket(ticket.clone()).await?;
        tracing::info!(
            ticket_id = %ticket.id,
            contractor_id = %ticket.contractor_id,
            "Ticket created"
        );
        Ok(ticket)
    }

    /// Withdraw a ticket before any work has been recorded.
    pub async fn cancel(&self, principal: &Principal, id: Uuid) -> TicketResult<Ticket> {
        let mut ticket = self.ticket(id).await?;
        ensure_issuer(principal, &ticket)?;

        if ticket.fact_start_at.is_some() {
            return Err(TicketError::conflict(format!(
                "ticket {} already has recorded work",
                id
            )));
        }
        let trips = self.store.count_trips(&TripFilter::for_ticket(id)).await?;
        if trips > 0 {
            return Err(TicketError::conflict(format!(
                "ticket {} has {} trip(s)",
                id, trips
            )));
        }

        advance(&mut ticket, TicketStatus::Cancelled, Utc::now())?;
        self.store.update_ticket(&ticket).await?;
        tracing::info!(ticket_id = %id, "Ticket cancelled");
        Ok(ticket)
    }

    /// Accept a completed ticket. Terminal.
    pub async fn close(&self, principal: &Principal, id: Uuid) -> TicketResult<Ticket> {
        let mut ticket = self.ticket(id).await?;
        ensure_issuer(principal, &ticket)?;

        advance(&mut ticket, TicketStatus::Closed, Utc::now())?;
        self.store.update_ticket(&ticket).await?;
        tracing::info!(ticket_id = %id, "Ticket closed");
        Ok(ticket)
    }

    /// Contractor-initiated completion.
    ///
    /// Re-completing a COMPLETED ticket returns it unchanged; unmet
    /// preconditions are a `Conflict`.
    pub async fn complete(&self, principal: &Principal, id: Uuid) -> TicketResult<Ticket> {
        let ticket = self.ticket(id).await?;
        if principal.role != Role::Contractor || principal.org_id != ticket.contractor_id {
            return Err(TicketError::permission_denied(
                "only the ticket's contractor can complete it",
            ));
        }

        match self.check_and_complete(ticket).await? {
            AutoComplete::Completed(ticket) => Ok(ticket),
            AutoComplete::AlreadyCompleted => self.ticket(id).await,
            AutoComplete::NotEligible(status) => Err(TicketError::conflict(format!(
                "ticket {} is {}, not IN_PROGRESS",
                id, status
            ))),
            AutoComplete::Blocked(blockers) => Err(TicketError::conflict(format!(
                "ticket {} cannot complete: {}",
                id, blockers
            ))),
        }
    }

    /// Complete the ticket if every trip and assignment under it is closed.
    ///
    /// Never an error for state reasons; only lookup and store failures
    /// propagate.
    pub async fn try_auto_complete(&self, id: Uuid) -> TicketResult<AutoComplete> {
        let ticket = self.ticket(id).await?;
        let outcome = self.check_and_complete(ticket).await?;
        if let AutoComplete::Blocked(blockers) = &outcome {
            tracing::debug!(ticket_id = %id, %blockers, "Auto-complete deferred");
        }
        Ok(outcome)
    }

    /// Start work on a PLANNED ticket once it has a trip.
    pub async fn on_trip_created(&self, id: Uuid) -> TicketResult<Ticket> {
        let mut ticket = self.ticket(id).await?;
        if ticket.status != TicketStatus::Planned || ticket.fact_start_at.is_some() {
            return Ok(ticket);
        }
        let trips = self.store.count_trips(&TripFilter::for_ticket(id)).await?;
        if trips == 0 {
            return Ok(ticket);
        }

        advance(&mut ticket, TicketStatus::InProgress, Utc::now())?;
        self.store.update_ticket(&ticket).await?;
        tracing::info!(ticket_id = %id, "Ticket in progress after first trip");
        Ok(ticket)
    }

    /// Start work on a PLANNED ticket when a driver marks in-work.
    pub(crate) async fn on_work_started(&self, id: Uuid) -> TicketResult<Ticket> {
        let mut ticket = self.ticket(id).await?;
        if ticket.status != TicketStatus::Planned || ticket.fact_start_at.is_some() {
            return Ok(ticket);
        }

        advance(&mut ticket, TicketStatus::InProgress, Utc::now())?;
        self.store.update_ticket(&ticket).await?;
        tracing::info!(ticket_id = %id, "Ticket in progress after driver mark");
        Ok(ticket)
    }

    /// Count what still blocks completion of a ticket.
    pub async fn blockers(&self, id: Uuid) -> TicketResult<CompletionBlockers> {
        let incomplete_trips = self
            .store
            .count_trips(&TripFilter {
                incomplete_only: true,
                ..TripFilter::for_ticket(id)
            })
            .await?;
        let outstanding_assignments = self
            .store
            .count_assignments(&AssignmentFilter {
                outstanding_only: true,
                ..AssignmentFilter::for_ticket(id)
            })
            .await?;
        let loaded_exits = self
            .store
            .count_trips(&TripFilter {
                exit_volume_above: Some(self.thresholds.exit_volume_tolerance),
                ..TripFilter::for_ticket(id)
            })
            .await?;

        Ok(CompletionBlockers {
            incomplete_trips,
            outstanding_assignments,
            loaded_exits,
        })
    }

    /// Trip count, credited volume and violation flag for a ticket.
    pub async fn metrics(&self, id: Uuid) -> TicketResult<TicketMetrics> {
        let trips = self.store.list_trips(&TripFilter::for_ticket(id)).await?;
        Ok(TicketMetrics {
            total_trips: trips.len(),
            total_volume_m3: trips.iter().map(|t| t.credited_volume()).sum(),
            has_violations: trips.iter().any(|t| t.status.is_violation()),
        })
    }

    async fn check_and_complete(&self, mut ticket: Ticket) -> TicketResult<AutoComplete> {
        match ticket.status {
            TicketStatus::Completed => return Ok(AutoComplete::AlreadyCompleted),
            TicketStatus::InProgress => {}
            other => return Ok(AutoComplete::NotEligible(other)),
        }

        let blockers = self.blockers(ticket.id).await?;
        if !blockers.is_clear() {
            return Ok(AutoComplete::Blocked(blockers));
        }

        advance(&mut ticket, TicketStatus::Completed, Utc::now())?;
        self.store.update_ticket(&ticket).await?;
        tracing::info!(ticket_id = %ticket.id, "Ticket completed");
        Ok(AutoComplete::Completed(ticket))
    }
}

fn ensure_issuer(principal: &Principal, ticket: &Ticket) -> TicketResult<()> {
    if principal.role != Role::Issuer || principal.org_id != ticket.created_by_org_id {
        return Err(TicketError::permission_denied(
            "only the issuing organization can change this ticket",
        ));
    }
    Ok(())
}
