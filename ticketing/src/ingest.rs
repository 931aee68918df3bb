//! Sensor-driven trip ingestion
//!
//! Camera and volume-sensor events open a trip on entry and close it on
//! exit. Both steps classify the trip; closing re-runs the chain from the
//! reporter's base status so that a missing exit event seen on entry does
//! not outlive the exit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{TripClassifier, TripSignals, Verdict};
use crate::error::{TicketError, TicketResult};
use crate::lifecycle::TicketLifecycle;
use crate::model::{TicketAssignment, Trip, TripStatus};
use crate::plate;
use crate::store::TicketStore;

/// Entry-side report for a new trip
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TripReport {
    /// Explicit assignment; otherwise resolved from driver, then vehicle
    pub assignment_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    /// Vehicle the detected plate resolved to
    pub detected_vehicle_id: Option<Uuid>,
    pub camera_id: Option<Uuid>,
    pub polygon_id: Option<Uuid>,
    /// Expected plate; defaults to the vehicle's registered plate
    pub vehicle_plate_number: Option<String>,
    pub detected_plate_number: String,
    pub entry_lpr_event_id: Option<Uuid>,
    pub entry_volume_event_id: Option<Uuid>,
    pub detected_volume_entry: Option<f64>,
    pub entry_at: Option<DateTime<Utc>>,
    /// Externally determined status; anything but OK is kept as is
    pub status: TripStatus,
}

/// Exit-side report closing an open trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripExit {
    pub exit_at: DateTime<Utc>,
    #[serde(default)]
    pub exit_lpr_event_id: Option<Uuid>,
    #[serde(default)]
    pub exit_volume_event_id: Option<Uuid>,
    #[serde(default)]
    pub detected_volume_exit: Option<f64>,
}

/// Records sensor trips, classifies them and drives ticket automation
pub struct TripIngest {
    store: Arc<dyn TicketStore>,
    lifecycle: Arc<TicketLifecycle>,
    classifier: TripClassifier,
}

impl TripIngest {
    pub fn new(
        store: Arc<dyn TicketStore>,
        lifecycle: Arc<TicketLifecycle>,
        classifier: TripClassifier,
    ) -> Self {
        Self {
            store,
            lifecycle,
            classifier,
        }
    }

    /// Open a trip from an entry report.
    pub async fn record_trip(&self, report: TripReport) -> TicketResult<Trip> {
        let entry_at = report
            .entry_at
            .ok_or_else(|| TicketError::invalid_input("entry_at is required"))?;
        let assignment = self.resolve_assignment(&report).await?;

        if let Some(assignment) = &assignment {
            let ticket = self.lifecycle.ticket(assignment.ticket_id).await?;
            if ticket.status.is_terminal() {
                return Err(TicketError::conflict(format!(
                    "ticket {} is {}",
                    ticket.id, ticket.status
                )));
            }
        }

        let mut trip = Trip::entering(entry_at);
        trip.ticket_id = assignment.as_ref().map(|a| a.ticket_id);
        trip.assignment_id = assignment.as_ref().map(|a| a.id);
        trip.driver_id = report.driver_id.or(assignment.as_ref().map(|a| a.driver_id));
        trip.vehicle_id = report
            .vehicle_id
            .or(assignment.as_ref().map(|a| a.vehicle_id));
        trip.detected_vehicle_id = report.detected_vehicle_id;
        trip.camera_id = report.camera_id;
        trip.polygon_id = report.polygon_id;
        trip.detected_plate_number = plate::normalize(&report.detected_plate_number);
        trip.entry_lpr_event_id = report.entry_lpr_event_id;
        trip.entry_volume_event_id = report.entry_volume_event_id;
        trip.detected_volume_entry = report.detected_volume_entry;
        trip.reported_status = report.status;

        let vehicle = match trip.vehicle_id {
            Some(id) => self.store.vehicle(id).await?,
            None => None,
        };
        if let Some(v) = &vehicle {
            trip.vehicle_body_volume_m3 = v.body_volume_m3;
        }
        let expected = report
            .vehicle_plate_number
            .clone()
            .or_else(|| vehicle.map(|v| v.plate_number))
            .unwrap_or_default();
        trip.vehicle_plate_number = plate::normalize(&expected);

        let verdict = self
            .classify(&trip, assignment, report.vehicle_id)
            .await?;
        apply(&mut trip, verdict);

        self.store.insert_trip(trip.clone()).await?;
        tracing::info!(
            trip_id = %trip.id,
            ticket_id = ?trip.ticket_id,
            status = %trip.status,
            "Trip recorded"
        );

        if let Some(ticket_id) = trip.ticket_id {
            self.lifecycle.on_trip_created(ticket_id).await?;
            self.lifecycle.try_auto_complete(ticket_id).await?;
        }
        Ok(trip)
    }

    /// Close an open trip with its exit events and re-classify it.
    ///
    /// A trip the driver already finished through reconciliation has an exit
    /// time but may still lack exit events; those arrive here as well. Only a
    /// trip that already carries both exit events is rejected.
    pub async fn close_trip(&self, trip_id: Uuid, exit: TripExit) -> TicketResult<Trip> {
        let mut trip = self
            .store
            .trip(trip_id)
            .await?
            .ok_or_else(|| TicketError::not_found("trip", trip_id))?;
        let awaiting_exit_events = trip.reconciled && trip.is_incomplete();
        if !trip.is_open() && !awaiting_exit_events {
            return Err(TicketError::conflict(format!(
                "trip {} is already closed",
                trip_id
            )));
        }
        if exit.exit_at < trip.entry_at {
            return Err(TicketError::invalid_input("exit_at is before entry_at"));
        }

        trip.exit_at = Some(exit.exit_at);
        trip.exit_lpr_event_id = exit.exit_lpr_event_id;
        trip.exit_volume_event_id = exit.exit_volume_event_id;
        trip.detected_volume_exit = exit.detected_volume_exit;
        trip.updated_at = Utc::now();

        let assignment = match trip.assignment_id {
            Some(id) => self.store.assignment(id).await?,
            None => None,
        };
        let verdict = self.classify(&trip, assignment, trip.vehicle_id).await?;
        apply(&mut trip, verdict);

        self.store.update_trip(&trip).await?;
        tracing::info!(
            trip_id = %trip.id,
            status = %trip.status,
            reconciled = trip.reconciled,
            "Trip closed"
        );

        if let Some(ticket_id) = trip.ticket_id {
            self.lifecycle.try_auto_complete(ticket_id).await?;
        }
        Ok(trip)
    }

    async fn resolve_assignment(
        &self,
        report: &TripReport,
    ) -> TicketResult<Option<TicketAssignment>> {
        if let Some(id) = report.assignment_id {
            let assignment = self
                .store
                .assignment(id)
                .await?
                .ok_or_else(|| TicketError::not_found("assignment", id))?;
            if !assignment.is_active {
                return Err(TicketError::conflict(format!(
                    "assignment {} is not active",
                    id
                )));
            }
            return Ok(Some(assignment));
        }
        if let Some(driver_id) = report.driver_id {
            if let Some(a) = self.store.active_assignment_for_driver(driver_id).await? {
                return Ok(Some(a));
            }
        }
        if let Some(vehicle_id) = report.vehicle_id {
            return Ok(self.store.active_assignment_for_vehicle(vehicle_id).await?);
        }
        Ok(None)
    }

    async fn classify(
        &self,
        trip: &Trip,
        assignment: Option<TicketAssignment>,
        provided_vehicle_id: Option<Uuid>,
    ) -> TicketResult<Verdict> {
        let last_position = match trip.vehicle_id {
            Some(id) => self.store.last_position(id).await?,
            None => None,
        };
        let signals = TripSignals {
            base_status: trip.reported_status,
            assignment,
            provided_vehicle_id,
            resolved_vehicle_id: trip.detected_vehicle_id,
            expected_plate: trip.vehicle_plate_number.clone(),
            detected_plate: trip.detected_plate_number.clone(),
            entry_volume: trip.detected_volume_entry,
            exit_volume: trip.detected_volume_exit,
            body_volume: trip.vehicle_body_volume_m3,
            exit_plate_event: trip.exit_lpr_event_id.is_some(),
            exit_volume_event: trip.exit_volume_event_id.is_some(),
            entry_at: trip.entry_at,
            exit_registered_at: trip.exit_at,
            last_position,
        };
        Ok(self.classifier.classify(&signals))
    }
}

fn apply(trip: &mut Trip, verdict: Verdict) {
    trip.status = verdict.status;
    trip.violation_reason = verdict.reason();
}
