//! End-to-end ticket scenarios through `TicketService`.
//!
//! Covers:
//! - Completion blocked by an assignment still in work, then allowed
//! - Driver completion surviving a sensor feed outage
//! - Reconciled volume flowing into ticket metrics
//! - Exit events arriving after the driver already marked completion
//! - Racing completion marks on one assignment
//! - Cancellation before and after work starts

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ticketing::feed::{Direction, EventQuery, FeedError, FeedResult, PlateEvent, SensorFeed};
use ticketing::model::{
    DriverMarkStatus, NewTicket, Principal, Ticket, TicketAssignment, TicketStatus, TripStatus,
    Vehicle,
};
use ticketing::store::MemoryStore;
use ticketing::{
    AutoComplete, ComplianceThresholds, EngineConfig, TicketService, TripExit, TripReport,
    VolumeReading,
};

/// Feed that fails a fixed number of times, then reports one entry event per
/// entry in `volumes` at the start of the queried window, plus one event just
/// past its end.
struct StubFeed {
    failures_left: AtomicU32,
    calls: AtomicU32,
    volumes: Vec<Option<f64>>,
}

impl StubFeed {
    fn answering(volumes: Vec<Option<f64>>) -> Self {
        Self {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            volumes,
        }
    }

    fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            calls: AtomicU32::new(0),
            volumes: Vec::new(),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn plate_event(query: &EventQuery, at: DateTime<Utc>, volume: Option<f64>) -> PlateEvent {
    PlateEvent {
        id: Uuid::new_v4(),
        plate: query.plate.clone(),
        timestamp: at,
        direction: Some(Direction::Entry),
        volume_m3: volume,
        camera_id: Some("gate-1".into()),
        polygon_id: None,
    }
}

#[async_trait]
impl SensorFeed for StubFeed {
    async fn entry_events(&self, query: &EventQuery) -> FeedResult<Vec<PlateEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(FeedError::Transport("connection refused".into()));
        }
        let mut events: Vec<PlateEvent> = self
            .volumes
            .iter()
            .map(|v| plate_event(query, query.start, *v))
            .collect();
        if !events.is_empty() {
            events.push(plate_event(
                query,
                query.end + Duration::minutes(1),
                Some(50.0),
            ));
        }
        Ok(events)
    }
}

struct World {
    service: TicketService,
    issuer: Principal,
    contractor: Principal,
    ticket: Ticket,
}

fn config() -> EngineConfig {
    EngineConfig::new(ComplianceThresholds {
        min_entry_volume_ratio: 0.5,
        exit_volume_tolerance: 0.3,
    })
}

async fn world(feed: Arc<StubFeed>) -> World {
    let store = MemoryStore::new().shared();
    let service = TicketService::new(store, feed, &config());
    let issuer = Principal::issuer(Uuid::new_v4());
    let contractor = Principal::contractor(Uuid::new_v4());
    let now = Utc::now();
    let ticket = service
        .create_ticket(
            &issuer,
            NewTicket {
                cleaning_area_id: Uuid::new_v4(),
                contractor_id: contractor.org_id,
                contract_id: Uuid::new_v4(),
                planned_start_at: now,
                planned_end_at: now + Duration::hours(10),
                description: "Main avenue, both directions".into(),
            },
        )
        .await
        .unwrap();
    World {
        service,
        issuer,
        contractor,
        ticket,
    }
}

/// Register a vehicle and assign it with a fresh driver.
async fn crew(w: &World, plate: &str) -> (Principal, Vehicle, TicketAssignment) {
    let vehicle = w
        .service
        .add_vehicle(Vehicle {
            id: Uuid::new_v4(),
            contractor_id: w.contractor.org_id,
            plate_number: plate.into(),
            body_volume_m3: Some(20.0),
        })
        .await
        .unwrap();
    let driver = Principal::driver(w.contractor.org_id, Uuid::new_v4());
    let assignment = w
        .service
        .assign(
            &w.contractor,
            w.ticket.id,
            driver.driver_id.unwrap(),
            vehicle.id,
        )
        .await
        .unwrap();
    (driver, vehicle, assignment)
}

/// A sensor trip for the assignment, entered and exited with both events.
async fn sensor_trip(w: &World, vehicle: &Vehicle, assignment: &TicketAssignment) {
    let trip = w
        .service
        .record_trip(TripReport {
            assignment_id: Some(assignment.id),
            vehicle_id: Some(vehicle.id),
            detected_plate_number: vehicle.plate_number.clone(),
            entry_lpr_event_id: Some(Uuid::new_v4()),
            entry_volume_event_id: Some(Uuid::new_v4()),
            detected_volume_entry: Some(16.0),
            entry_at: Some(Utc::now() - Duration::minutes(20)),
            ..Default::default()
        })
        .await
        .unwrap();
    let closed = w
        .service
        .close_trip(
            trip.id,
            TripExit {
                exit_at: Utc::now(),
                exit_lpr_event_id: Some(Uuid::new_v4()),
                exit_volume_event_id: Some(Uuid::new_v4()),
                detected_volume_exit: Some(0.0),
            },
        )
        .await
        .unwrap();
    assert_eq!(closed.status, TripStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_completion_waits_for_every_assignment() {
    let w = world(Arc::new(StubFeed::answering(Vec::new()))).await;
    let (driver_a, vehicle_a, a) = crew(&w, "101 AAA 02").await;
    let (driver_b, vehicle_b, b) = crew(&w, "202 BBB 02").await;

    w.service.mark_in_work(&driver_a, a.id).await.unwrap();
    w.service.mark_in_work(&driver_b, b.id).await.unwrap();
    sensor_trip(&w, &vehicle_a, &a).await;
    sensor_trip(&w, &vehicle_b, &b).await;

    let done_a = w
        .service
        .mark_completed(&driver_a, a.id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(done_a.auto_complete, AutoComplete::Blocked(_)));

    // B is still IN_WORK
    let err = w.service.complete(&w.contractor, w.ticket.id).await.unwrap_err();
    assert!(err.is_conflict());
    let ticket = w.service.ticket(w.ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::InProgress);
    assert!(ticket.fact_end_at.is_none());

    w.service
        .mark_completed(&driver_b, b.id, &CancellationToken::new())
        .await
        .unwrap();
    let ticket = w.service.complete(&w.contractor, w.ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);
    assert!(ticket.fact_end_at.is_some());

    // Already completed: repeated checks change nothing
    for _ in 0..2 {
        let outcome = w.service.try_auto_complete(w.ticket.id).await.unwrap();
        assert_eq!(outcome, AutoComplete::AlreadyCompleted);
    }
    assert_eq!(w.service.ticket(w.ticket.id).await.unwrap(), ticket);

    let closed = w.service.close(&w.issuer, w.ticket.id).await.unwrap();
    assert_eq!(closed.status, TicketStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_mark_completed_survives_feed_outage() {
    let feed = Arc::new(StubFeed::failing(3));
    let w = world(feed.clone()).await;
    let (driver, _vehicle, a) = crew(&w, "12 AB-3456").await;

    w.service.mark_in_work(&driver, a.id).await.unwrap();
    let done = w
        .service
        .mark_completed(&driver, a.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(feed.calls(), 3);
    assert_eq!(done.assignment.driver_mark_status, DriverMarkStatus::Completed);
    let reconciliation = done.reconciliation.expect("reconciliation ran");
    assert!(matches!(
        reconciliation.reading,
        VolumeReading::Unavailable { attempts: 3, .. }
    ));
    assert_eq!(reconciliation.trip.total_volume_m3, Some(0.0));
    assert_eq!(reconciliation.trip.status, TripStatus::Ok);

    let trips = w.service.trips(w.ticket.id).await.unwrap();
    assert_eq!(trips.len(), 1);
    assert!(trips[0].reconciled);
}

#[tokio::test(start_paused = true)]
async fn test_reconciled_volume_credited_to_ticket() {
    let feed = Arc::new(StubFeed::answering(vec![Some(9.0), Some(11.5), None]));
    let w = world(feed.clone()).await;
    let (driver, _vehicle, a) = crew(&w, "12 AB-3456").await;

    w.service.mark_in_work(&driver, a.id).await.unwrap();
    let done = w
        .service
        .mark_completed(&driver, a.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(feed.calls(), 1);

    // The event past the window end is dropped
    let reading = done.reconciliation.unwrap().reading;
    assert_eq!(
        reading,
        VolumeReading::Measured {
            total_m3: 20.5,
            events: 3,
            with_volume: 2
        }
    );

    let metrics = w.service.metrics(w.ticket.id).await.unwrap();
    assert_eq!(metrics.total_trips, 1);
    assert!((metrics.total_volume_m3 - 20.5).abs() < 1e-9);
    assert!(!metrics.has_violations);
}

#[tokio::test(start_paused = true)]
async fn test_exit_events_after_driver_completion() {
    let w = world(Arc::new(StubFeed::answering(vec![Some(12.0)]))).await;
    let (driver, vehicle, a) = crew(&w, "303 CCC 03").await;
    w.service.mark_in_work(&driver, a.id).await.unwrap();

    // Entry cameras fire while the driver is out
    let trip = w
        .service
        .record_trip(TripReport {
            assignment_id: Some(a.id),
            vehicle_id: Some(vehicle.id),
            detected_plate_number: vehicle.plate_number.clone(),
            entry_lpr_event_id: Some(Uuid::new_v4()),
            entry_volume_event_id: Some(Uuid::new_v4()),
            detected_volume_entry: Some(16.0),
            entry_at: Some(Utc::now() - Duration::minutes(20)),
            ..Default::default()
        })
        .await
        .unwrap();

    // Driver reports completion before the exit cameras
    let done = w
        .service
        .mark_completed(&driver, a.id, &CancellationToken::new())
        .await
        .unwrap();
    let reconciled = done.reconciliation.unwrap().trip;
    assert_eq!(reconciled.id, trip.id);
    assert!(reconciled.exit_at.is_some());
    assert!(reconciled.is_incomplete());
    assert!(matches!(done.auto_complete, AutoComplete::Blocked(b) if b.incomplete_trips == 1));

    let closed = w
        .service
        .close_trip(
            trip.id,
            TripExit {
                exit_at: Utc::now(),
                exit_lpr_event_id: Some(Uuid::new_v4()),
                exit_volume_event_id: Some(Uuid::new_v4()),
                detected_volume_exit: Some(0.0),
            },
        )
        .await
        .unwrap();
    assert_eq!(closed.status, TripStatus::Ok);
    assert_eq!(closed.total_volume_m3, Some(12.0));

    let ticket = w.service.ticket(w.ticket.id).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);
    assert!(ticket.fact_end_at.is_some());
    let again = w.service.complete(&w.contractor, w.ticket.id).await.unwrap();
    assert_eq!(again, ticket);
}

#[tokio::test]
async fn test_racing_completion_marks() {
    let w = world(Arc::new(StubFeed::answering(Vec::new()))).await;
    let (driver, _vehicle, a) = crew(&w, "555 XYZ 05").await;
    w.service.mark_in_work(&driver, a.id).await.unwrap();

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        w.service.mark_completed(&driver, a.id, &cancel),
        w.service.mark_completed(&driver, a.id, &cancel),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_conflict()));
}

#[tokio::test]
async fn test_cancel_only_before_work() {
    let w = world(Arc::new(StubFeed::answering(Vec::new()))).await;
    let (driver, _vehicle, a) = crew(&w, "808 QWE 08").await;
    w.service.mark_in_work(&driver, a.id).await.unwrap();

    let err = w.service.cancel(&w.issuer, w.ticket.id).await.unwrap_err();
    assert!(err.is_conflict());

    let now = Utc::now();
    let fresh = w
        .service
        .create_ticket(
            &w.issuer,
            NewTicket {
                cleaning_area_id: Uuid::new_v4(),
                contractor_id: w.contractor.org_id,
                contract_id: Uuid::new_v4(),
                planned_start_at: now,
                planned_end_at: now + Duration::hours(2),
                description: String::new(),
            },
        )
        .await
        .unwrap();
    let cancelled = w.service.cancel(&w.issuer, fresh.id).await.unwrap();
    assert_eq!(cancelled.status, TicketStatus::Cancelled);
}
