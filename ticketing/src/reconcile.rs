//! Volume reconciliation for driver-reported trips
//!
//! When a driver marks an assignment completed, the carried volume for the
//! driving window is summed from the sensor feed's entry events and written
//! to the assignment's trip. Feed trouble never fails reconciliation: the
//! reading degrades to [`VolumeReading::Unavailable`] and the trip is
//! credited with zero.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{TicketError, TicketResult};
use crate::feed::{fetch_with_retry, EventQuery, FeedHealth, RetryPolicy, SensorFeed};
use crate::lifecycle::TicketLifecycle;
use crate::model::{TicketAssignment, Trip, TripStatus};
use crate::plate;
use crate::store::TicketStore;

/// Outcome of a feed-backed volume measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeReading {
    /// Feed answered; an empty answer is a measured zero
    Measured {
        total_m3: f64,
        /// Entry events inside the window
        events: usize,
        /// How many of those carried a volume
        with_volume: usize,
    },
    /// Feed could not be queried; volume defaults to zero
    Unavailable { attempts: u32, reason: String },
}

impl VolumeReading {
    /// Volume to credit: the measured total, or zero when unavailable.
    pub fn volume_m3(&self) -> f64 {
        match self {
            Self::Measured { total_m3, .. } => *total_m3,
            Self::Unavailable { .. } => 0.0,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Measured { .. })
    }
}

/// Result of reconciling one assignment
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub reading: VolumeReading,
    pub trip: Trip,
    /// A new trip was created rather than an existing one updated
    pub created: bool,
}

/// Sums entry-event volumes and upserts the assignment's trip
pub struct VolumeReconciler {
    store: Arc<dyn TicketStore>,
    feed: Arc<dyn SensorFeed>,
    lifecycle: Arc<TicketLifecycle>,
    policy: RetryPolicy,
    health: Mutex<FeedHealth>,
}

impl VolumeReconciler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        feed: Arc<dyn SensorFeed>,
        lifecycle: Arc<TicketLifecycle>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            feed,
            lifecycle,
            policy,
            health: Mutex::new(FeedHealth::new()),
        }
    }

    /// Snapshot of the feed's health as seen by this reconciler.
    pub fn health(&self) -> FeedHealth {
        self.health
            .lock()
            .map(|h| h.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Query the feed for `plate` in `[start, end]` and sum entry volumes.
    pub async fn measure(
        &self,
        plate: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> VolumeReading {
        let query = EventQuery {
            plate: plate.to_string(),
            start,
            end,
        };
        let fetched = fetch_with_retry(self.feed.as_ref(), &query, &self.policy, cancel).await;

        match fetched.result {
            Ok(events) => {
                let entries: Vec<_> = events
                    .iter()
                    .filter(|e| e.counts_as_entry() && query.contains(e.timestamp))
                    .collect();
                let with_volume = entries.iter().filter(|e| e.volume_m3.is_some()).count();
                let total_m3: f64 = entries.iter().filter_map(|e| e.volume_m3).sum();
                self.record_health(None);
                VolumeReading::Measured {
                    total_m3,
                    events: entries.len(),
                    with_volume,
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let health = self.record_health(Some(&reason));
                tracing::warn!(
                    plate = %plate,
                    attempts = fetched.attempts,
                    feed_health = %health.level,
                    failure_rate = health.failure_rate(),
                    error = %reason,
                    "Sensor feed unavailable, crediting zero volume"
                );
                VolumeReading::Unavailable {
                    attempts: fetched.attempts,
                    reason,
                }
            }
        }
    }

    /// Reconcile a finished assignment.
    ///
    /// Fails only when the driving window is incomplete or the vehicle plate
    /// cannot be resolved; feed errors degrade to zero volume.
    pub async fn reconcile(
        &self,
        assignment: &TicketAssignment,
        cancel: &CancellationToken,
    ) -> TicketResult<Reconciliation> {
        let span = tracing::info_span!(
            "reconcile",
            assignment_id = %assignment.id,
            ticket_id = %assignment.ticket_id,
        );
        self.reconcile_inner(assignment, cancel)
            .instrument(span)
            .await
    }

    async fn reconcile_inner(
        &self,
        assignment: &TicketAssignment,
        cancel: &CancellationToken,
    ) -> TicketResult<Reconciliation> {
        let (started, finished) = assignment.driving_window().ok_or_else(|| {
            TicketError::invalid_state(format!(
                "assignment {} has no complete driving window",
                assignment.id
            ))
        })?;

        let vehicle = self
            .store
            .vehicle(assignment.vehicle_id)
            .await?
            .ok_or_else(|| TicketError::not_found("vehicle", assignment.vehicle_id))?;
        let normalized = plate::normalize(&vehicle.plate_number);
        if normalized.is_empty() {
            return Err(TicketError::invalid_input(format!(
                "vehicle {} has no plate number",
                vehicle.id
            )));
        }

        let reading = self.measure(&normalized, started, finished, cancel).await;
        let volume = reading.volume_m3();
        let now = Utc::now();

        let existing = self.store.trip_for_assignment(assignment.id).await?;
        let (trip, created) = match existing {
            Some(mut trip) => {
                trip.exit_at = Some(finished);
                trip.total_volume_m3 = Some(volume);
                trip.status = TripStatus::Ok;
                trip.violation_reason = None;
                trip.reconciled = true;
                trip.updated_at = now;
                self.store.update_trip(&trip).await?;
                (trip, false)
            }
            None => {
                let mut trip = Trip::entering(started);
                trip.ticket_id = Some(assignment.ticket_id);
                trip.assignment_id = Some(assignment.id);
                trip.driver_id = Some(assignment.driver_id);
                trip.vehicle_id = Some(assignment.vehicle_id);
                trip.vehicle_body_volume_m3 = vehicle.body_volume_m3;
                trip.vehicle_plate_number = normalized.clone();
                trip.exit_at = Some(finished);
                trip.total_volume_m3 = Some(volume);
                trip.reconciled = true;
                self.store.insert_trip(trip.clone()).await?;
                (trip, true)
            }
        };

        tracing::info!(
            trip_id = %trip.id,
            total_volume_m3 = volume,
            measured = reading.is_available(),
            created,
            "Trip reconciled"
        );

        if created {
            if let Err(e) = self.lifecycle.on_trip_created(assignment.ticket_id).await {
                tracing::error!(error = %e, "Failed to start ticket after reconciled trip");
            }
        }

        Ok(Reconciliation {
            reading,
            trip,
            created,
        })
    }

    fn record_health(&self, failure: Option<&str>) -> FeedHealth {
        let mut health = match self.health.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match failure {
            Some(error) => health.record_failure(error),
            None => health.record_success(),
        }
        health.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplianceThresholds;
    use crate::feed::{DegradationLevel, FeedError, MockSensorFeed, PlateEvent};
    use crate::model::{NewTicket, Principal, TicketStatus, Vehicle};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        lifecycle: Arc<TicketLifecycle>,
        assignment: TicketAssignment,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new().shared();
        let lifecycle = Arc::new(TicketLifecycle::new(
            store.clone(),
            ComplianceThresholds {
                min_entry_volume_ratio: 0.5,
                exit_volume_tolerance: 0.3,
            },
        ));
        let issuer = Principal::issuer(Uuid::new_v4());
        let now = Utc::now();
        let ticket = lifecycle
            .create(
                &issuer,
                NewTicket {
                    cleaning_area_id: Uuid::new_v4(),
                    contractor_id: Uuid::new_v4(),
                    contract_id: Uuid::new_v4(),
                    planned_start_at: now,
                    planned_end_at: now + Duration::hours(4),
                    description: String::new(),
                },
            )
            .await
            .unwrap();

        let vehicle = Vehicle {
            id: Uuid::new_v4(),
            contractor_id: ticket.contractor_id,
            plate_number: "12 ab-3456".into(),
            body_volume_m3: Some(20.0),
        };
        store.insert_vehicle(vehicle.clone()).await.unwrap();

        let mut assignment = TicketAssignment::new(ticket.id, Uuid::new_v4(), vehicle.id);
        assignment.trip_started_at = Some(now - Duration::hours(2));
        assignment.trip_finished_at = Some(now);
        store.insert_assignment(assignment.clone()).await.unwrap();

        Fixture {
            store,
            lifecycle,
            assignment,
        }
    }

    fn reconciler(f: &Fixture, feed: MockSensorFeed) -> VolumeReconciler {
        VolumeReconciler::new(
            f.store.clone(),
            Arc::new(feed),
            f.lifecycle.clone(),
            RetryPolicy::default(),
        )
    }

    fn event(at: DateTime<Utc>, volume: Option<f64>) -> PlateEvent {
        PlateEvent {
            id: Uuid::new_v4(),
            plate: "12AB3456".into(),
            timestamp: at,
            direction: None,
            volume_m3: volume,
            camera_id: None,
            polygon_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sums_entry_volumes_in_window() {
        let f = fixture().await;
        let (start, end) = f.assignment.driving_window().unwrap();
        let mut feed = MockSensorFeed::new();
        feed.expect_entry_events()
            .withf(|q| q.plate == "12AB3456")
            .times(1)
            .returning(move |_| {
                Ok(vec![
                    event(start + Duration::minutes(10), Some(7.5)),
                    event(start + Duration::minutes(50), None),
                    event(end - Duration::minutes(5), Some(6.0)),
                    // Outside the window
                    event(end + Duration::minutes(1), Some(100.0)),
                ])
            });

        let r = reconciler(&f, feed);
        let result = r
            .reconcile(&f.assignment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.reading,
            VolumeReading::Measured {
                total_m3: 13.5,
                events: 3,
                with_volume: 2
            }
        );
        assert!(result.created);
        assert_eq!(result.trip.total_volume_m3, Some(13.5));
        assert_eq!(result.trip.status, TripStatus::Ok);
        assert!(result.trip.reconciled);
        assert_eq!(result.trip.vehicle_plate_number, "12AB3456");

        // First trip moves the ticket out of PLANNED
        let ticket = f.lifecycle.ticket(f.assignment.ticket_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_down_degrades_to_zero() {
        let f = fixture().await;
        let mut feed = MockSensorFeed::new();
        feed.expect_entry_events()
            .times(3)
            .returning(|_| Err(FeedError::Transport("connection refused".into())));

        let r = reconciler(&f, feed);
        let result = r
            .reconcile(&f.assignment, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            result.reading,
            VolumeReading::Unavailable { attempts: 3, .. }
        ));
        assert_eq!(result.trip.total_volume_m3, Some(0.0));
        assert_eq!(result.trip.status, TripStatus::Ok);
        assert_eq!(r.health().level, DegradationLevel::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_trip_is_updated() {
        let f = fixture().await;
        let (start, end) = f.assignment.driving_window().unwrap();
        let mut sensor_trip = Trip::entering(start);
        sensor_trip.ticket_id = Some(f.assignment.ticket_id);
        sensor_trip.assignment_id = Some(f.assignment.id);
        sensor_trip.status = TripStatus::NoExitCamera;
        sensor_trip.violation_reason = Some("missing_exit_event".into());
        f.store.insert_trip(sensor_trip.clone()).await.unwrap();

        let mut feed = MockSensorFeed::new();
        feed.expect_entry_events().returning(|_| Ok(vec![]));

        let r = reconciler(&f, feed);
        let result = r
            .reconcile(&f.assignment, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.created);
        assert_eq!(result.trip.id, sensor_trip.id);
        assert_eq!(result.trip.exit_at, Some(end));
        assert_eq!(result.trip.status, TripStatus::Ok);
        assert!(result.trip.violation_reason.is_none());
        assert_eq!(result.reading.volume_m3(), 0.0);
        assert!(result.reading.is_available());

        let stored = f.store.trip(sensor_trip.id).await.unwrap().unwrap();
        assert!(stored.reconciled);
    }

    #[tokio::test]
    async fn test_unfinished_window_is_invalid_state() {
        let f = fixture().await;
        let mut assignment = f.assignment.clone();
        assignment.trip_finished_at = None;

        let r = reconciler(&f, MockSensorFeed::new());
        let err = r
            .reconcile(&assignment, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_unknown_vehicle_is_hard_failure() {
        let f = fixture().await;
        let mut assignment = f.assignment.clone();
        assignment.vehicle_id = Uuid::new_v4();

        let r = reconciler(&f, MockSensorFeed::new());
        let err = r
            .reconcile(&assignment, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::NotFound { entity: "vehicle", .. }));
    }
}
