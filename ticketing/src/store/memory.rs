//! In-memory store with JSON snapshot persistence

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AssignmentFilter, StoreError, StoreResult, TicketStore, TripFilter};
use crate::model::{
    DriverMarkStatus, Ticket, TicketAssignment, Trip, Vehicle, VehiclePosition,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    tickets: HashMap<Uuid, Ticket>,
    assignments: HashMap<Uuid, TicketAssignment>,
    trips: HashMap<Uuid, Trip>,
    vehicles: HashMap<Uuid, Vehicle>,
    positions: HashMap<Uuid, VehiclePosition>,
}

/// `RwLock`-guarded maps; every trait call is a single critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc` for sharing between services
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Load a snapshot; a missing file yields an empty store.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = std::fs::read_to_string(path)?;
        let tables: Tables =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write the full store as pretty JSON
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = {
            let tables = self.read()?;
            serde_json::to_string_pretty(&*tables)
                .map_err(|e| StoreError::Serialization(e.to_string()))?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        self.write()?.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    async fn ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.read()?.tickets.get(&id).cloned())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> StoreResult<()> {
        let mut tables = self.write()?;
        let slot = tables.tickets.get_mut(&ticket.id).ok_or(StoreError::Missing {
            entity: "ticket",
            id: ticket.id,
        })?;
        *slot = ticket.clone();
        Ok(())
    }

    async fn insert_assignment(&self, assignment: TicketAssignment) -> StoreResult<()> {
        self.write()?.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    async fn assignment(&self, id: Uuid) -> StoreResult<Option<TicketAssignment>> {
        Ok(self.read()?.assignments.get(&id).cloned())
    }

    async fn update_assignment(&self, assignment: &TicketAssignment) -> StoreResult<()> {
        let mut tables = self.write()?;
        let slot = tables
            .assignments
            .get_mut(&assignment.id)
            .ok_or(StoreError::Missing {
                entity: "assignment",
                id: assignment.id,
            })?;
        *slot = assignment.clone();
        Ok(())
    }

    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
    ) -> StoreResult<Vec<TicketAssignment>> {
        let tables = self.read()?;
        let mut found: Vec<TicketAssignment> = tables
            .assignments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.assigned_at);
        Ok(found)
    }

    async fn count_assignments(&self, filter: &AssignmentFilter) -> StoreResult<usize> {
        let tables = self.read()?;
        Ok(tables
            .assignments
            .values()
            .filter(|a| filter.matches(a))
            .count())
    }

    async fn start_assignment_trip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<TicketAssignment>> {
        let mut tables = self.write()?;
        let assignment = tables
            .assignments
            .get_mut(&id)
            .ok_or(StoreError::Missing {
                entity: "assignment",
                id,
            })?;
        if assignment.trip_started_at.is_some() {
            return Ok(None);
        }
        assignment.trip_started_at = Some(at);
        assignment.driver_mark_status = DriverMarkStatus::InWork;
        Ok(Some(assignment.clone()))
    }

    async fn finish_assignment_trip(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<TicketAssignment>> {
        let mut tables = self.write()?;
        let assignment = tables
            .assignments
            .get_mut(&id)
            .ok_or(StoreError::Missing {
                entity: "assignment",
                id,
            })?;
        if assignment.trip_started_at.is_none() || assignment.trip_finished_at.is_some() {
            return Ok(None);
        }
        assignment.trip_finished_at = Some(at);
        assignment.driver_mark_status = DriverMarkStatus::Completed;
        Ok(Some(assignment.clone()))
    }

    async fn insert_trip(&self, trip: Trip) -> StoreResult<()> {
        self.write()?.trips.insert(trip.id, trip);
        Ok(())
    }

    async fn trip(&self, id: Uuid) -> StoreResult<Option<Trip>> {
        Ok(self.read()?.trips.get(&id).cloned())
    }

    async fn update_trip(&self, trip: &Trip) -> StoreResult<()> {
        let mut tables = self.write()?;
        let slot = tables.trips.get_mut(&trip.id).ok_or(StoreError::Missing {
            entity: "trip",
            id: trip.id,
        })?;
        *slot = trip.clone();
        Ok(())
    }

    async fn list_trips(&self, filter: &TripFilter) -> StoreResult<Vec<Trip>> {
        let tables = self.read()?;
        let mut found: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.entry_at);
        Ok(found)
    }

    async fn count_trips(&self, filter: &TripFilter) -> StoreResult<usize> {
        let tables = self.read()?;
        Ok(tables.trips.values().filter(|t| filter.matches(t)).count())
    }

    async fn insert_vehicle(&self, vehicle: Vehicle) -> StoreResult<()> {
        self.write()?.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    async fn vehicle(&self, id: Uuid) -> StoreResult<Option<Vehicle>> {
        Ok(self.read()?.vehicles.get(&id).cloned())
    }

    async fn record_position(&self, position: VehiclePosition) -> StoreResult<()> {
        let mut tables = self.write()?;
        let newer = tables
            .positions
            .get(&position.vehicle_id)
            .map(|current| position.recorded_at >= current.recorded_at)
            .unwrap_or(true);
        if newer {
            tables.positions.insert(position.vehicle_id, position);
        }
        Ok(())
    }

    async fn last_position(&self, vehicle_id: Uuid) -> StoreResult<Option<VehiclePosition>> {
        Ok(self.read()?.positions.get(&vehicle_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn assignment() -> TicketAssignment {
        TicketAssignment::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_start_stamp_is_compare_and_set() {
        let store = MemoryStore::new();
        let a = assignment();
        store.insert_assignment(a.clone()).await.unwrap();

        let now = Utc::now();
        let first = store.start_assignment_trip(a.id, now).await.unwrap();
        assert_eq!(first.unwrap().driver_mark_status, DriverMarkStatus::InWork);

        let second = store
            .start_assignment_trip(a.id, now + Duration::seconds(1))
            .await
            .unwrap();
        assert!(second.is_none());
        let stored = store.assignment(a.id).await.unwrap().unwrap();
        assert_eq!(stored.trip_started_at, Some(now));
    }

    #[tokio::test]
    async fn test_finish_requires_start_and_happens_once() {
        let store = MemoryStore::new();
        let a = assignment();
        store.insert_assignment(a.clone()).await.unwrap();

        let now = Utc::now();
        assert!(store.finish_assignment_trip(a.id, now).await.unwrap().is_none());

        store.start_assignment_trip(a.id, now).await.unwrap();
        let done = store
            .finish_assignment_trip(a.id, now + Duration::minutes(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.driver_mark_status, DriverMarkStatus::Completed);
        assert!(store
            .finish_assignment_trip(a.id, now + Duration::minutes(31))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let store = MemoryStore::new();
        let trip = Trip::entering(Utc::now());
        let err = store.update_trip(&trip).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing { entity: "trip", .. }));
    }

    #[tokio::test]
    async fn test_stale_position_ignored() {
        let store = MemoryStore::new();
        let vehicle_id = Uuid::new_v4();
        let now = Utc::now();
        let fix = |at, inside| VehiclePosition {
            vehicle_id,
            latitude: 43.238,
            longitude: 76.945,
            recorded_at: at,
            inside_cleaning_area: inside,
            inside_polygon: inside,
        };
        store.record_position(fix(now, true)).await.unwrap();
        store
            .record_position(fix(now - Duration::minutes(5), false))
            .await
            .unwrap();
        let last = store.last_position(vehicle_id).await.unwrap().unwrap();
        assert!(last.inside_cleaning_area);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("snapshot.json");

        let store = MemoryStore::new();
        let a = assignment();
        store.insert_assignment(a.clone()).await.unwrap();
        store.save(&path).unwrap();

        let restored = MemoryStore::load(&path).unwrap();
        assert_eq!(restored.assignment(a.id).await.unwrap(), Some(a));
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.read().unwrap().tickets.len(), 0);
    }
}
