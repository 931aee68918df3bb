//! Wiring of the engine components behind one entry point

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classifier::{TripClassifier, TripSignals, Verdict};
use crate::config::EngineConfig;
use crate::error::{TicketError, TicketResult};
use crate::feed::{FeedHealth, RetryPolicy, SensorFeed};
use crate::ingest::{TripExit, TripIngest, TripReport};
use crate::lifecycle::{AutoComplete, TicketLifecycle};
use crate::marks::{CompletedMark, MarkTracker};
use crate::model::{
    NewTicket, Principal, Ticket, TicketAssignment, TicketMetrics, Trip, Vehicle,
    VehiclePosition,
};
use crate::reconcile::{Reconciliation, VolumeReconciler};
use crate::store::{AssignmentFilter, TicketStore, TripFilter};

/// Operations exposed to driving collaborators (HTTP handlers, the CLI)
pub struct TicketService {
    store: Arc<dyn TicketStore>,
    lifecycle: Arc<TicketLifecycle>,
    reconciler: Arc<VolumeReconciler>,
    marks: MarkTracker,
    ingest: TripIngest,
    classifier: TripClassifier,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        feed: Arc<dyn SensorFeed>,
        config: &EngineConfig,
    ) -> Self {
        let classifier = TripClassifier::from_config(config);
        let lifecycle = Arc::new(TicketLifecycle::new(store.clone(), config.thresholds));
        let reconciler = Arc::new(VolumeReconciler::new(
            store.clone(),
            feed,
            lifecycle.clone(),
            RetryPolicy::from_config(&config.feed),
        ));
        let marks = MarkTracker::new(store.clone(), lifecycle.clone(), reconciler.clone());
        let ingest = TripIngest::new(store.clone(), lifecycle.clone(), classifier);

        Self {
            store,
            lifecycle,
            reconciler,
            marks,
            ingest,
            classifier,
        }
    }

    // Tickets

    pub async fn create_ticket(
        &self,
        principal: &Principal,
        input: NewTicket,
    ) -> TicketResult<Ticket> {
        self.lifecycle.create(principal, input).await
    }

    pub async fn cancel(&self, principal: &Principal, ticket_id: Uuid) -> TicketResult<Ticket> {
        self.lifecycle.cancel(principal, ticket_id).await
    }

    pub async fn complete(&self, principal: &Principal, ticket_id: Uuid) -> TicketResult<Ticket> {
        self.lifecycle.complete(principal, ticket_id).await
    }

    pub async fn close(&self, principal: &Principal, ticket_id: Uuid) -> TicketResult<Ticket> {
        self.lifecycle.close(principal, ticket_id).await
    }

    pub async fn try_auto_complete(&self, ticket_id: Uuid) -> TicketResult<AutoComplete> {
        self.lifecycle.try_auto_complete(ticket_id).await
    }

    pub async fn ticket(&self, ticket_id: Uuid) -> TicketResult<Ticket> {
        self.lifecycle.ticket(ticket_id).await
    }

    pub async fn metrics(&self, ticket_id: Uuid) -> TicketResult<TicketMetrics> {
        self.lifecycle.metrics(ticket_id).await
    }

    pub async fn assignments(&self, ticket_id: Uuid) -> TicketResult<Vec<TicketAssignment>> {
        Ok(self
            .store
            .list_assignments(&AssignmentFilter::for_ticket(ticket_id))
            .await?)
    }

    pub async fn trips(&self, ticket_id: Uuid) -> TicketResult<Vec<Trip>> {
        Ok(self.store.list_trips(&TripFilter::for_ticket(ticket_id)).await?)
    }

    // Assignments and driver marks

    pub async fn assign(
        &self,
        principal: &Principal,
        ticket_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        self.marks
            .assign(principal, ticket_id, driver_id, vehicle_id)
            .await
    }

    pub async fn unassign(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        self.marks.unassign(principal, assignment_id).await
    }

    pub async fn mark_in_work(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
    ) -> TicketResult<TicketAssignment> {
        self.marks.mark_in_work(principal, assignment_id).await
    }

    pub async fn mark_completed(
        &self,
        principal: &Principal,
        assignment_id: Uuid,
        cancel: &CancellationToken,
    ) -> TicketResult<CompletedMark> {
        self.marks
            .mark_completed(principal, assignment_id, cancel)
            .await
    }

    /// Re-run reconciliation for a finished assignment.
    pub async fn reconcile(
        &self,
        assignment_id: Uuid,
        cancel: &CancellationToken,
    ) -> TicketResult<Reconciliation> {
        let assignment = self
            .store
            .assignment(assignment_id)
            .await?
            .ok_or_else(|| TicketError::not_found("assignment", assignment_id))?;
        self.reconciler.reconcile(&assignment, cancel).await
    }

    pub fn feed_health(&self) -> FeedHealth {
        self.reconciler.health()
    }

    // Trips

    pub async fn record_trip(&self, report: TripReport) -> TicketResult<Trip> {
        self.ingest.record_trip(report).await
    }

    pub async fn close_trip(&self, trip_id: Uuid, exit: TripExit) -> TicketResult<Trip> {
        self.ingest.close_trip(trip_id, exit).await
    }

    /// Classify pre-resolved signals without touching storage.
    pub fn classify(&self, signals: &TripSignals) -> Verdict {
        self.classifier.classify(signals)
    }

    // Fleet

    pub async fn add_vehicle(&self, vehicle: Vehicle) -> TicketResult<Vehicle> {
        if crate::plate::normalize(&vehicle.plate_number).is_empty() {
            return Err(TicketError::invalid_input("plate_number is required"));
        }
        self.store.insert_vehicle(vehicle.clone()).await?;
        tracing::info!(vehicle_id = %vehicle.id, plate = %vehicle.plate_number, "Vehicle registered");
        Ok(vehicle)
    }

    pub async fn record_position(&self, position: VehiclePosition) -> TicketResult<()> {
        self.store.record_position(position).await?;
        Ok(())
    }
}
