//! Work-order tickets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Created, no work recorded yet
    Planned,
    /// First driver mark or first trip recorded
    InProgress,
    /// Every trip and assignment satisfied closure criteria
    Completed,
    /// Accepted by the issuing organization (terminal)
    Closed,
    /// Withdrawn before any fact existed (terminal)
    Cancelled,
}

impl TicketStatus {
    /// Whether no further work may be recorded against the ticket.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Closed | Self::Cancelled)
    }

    /// Whether assignments may still be added or removed.
    pub fn accepts_assignments(self) -> bool {
        matches!(self, Self::Planned | Self::InProgress)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planned => write!(f, "PLANNED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A municipal work order for clearing one cleaning area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub cleaning_area_id: Uuid,
    /// Contractor organization doing the work
    pub contractor_id: Uuid,
    /// Organization that issued the ticket
    pub created_by_org_id: Uuid,
    pub contract_id: Uuid,
    pub status: TicketStatus,
    pub planned_start_at: DateTime<Utc>,
    pub planned_end_at: DateTime<Utc>,
    /// Set once, when the ticket first leaves PLANNED
    pub fact_start_at: Option<DateTime<Utc>>,
    pub fact_end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicket {
    pub cleaning_area_id: Uuid,
    pub contractor_id: Uuid,
    pub contract_id: Uuid,
    pub planned_start_at: DateTime<Utc>,
    pub planned_end_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

impl Ticket {
    /// Build a PLANNED ticket issued by `org_id`.
    pub fn planned(input: NewTicket, org_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cleaning_area_id: input.cleaning_area_id,
            contractor_id: input.contractor_id,
            created_by_org_id: org_id,
            contract_id: input.contract_id,
            status: TicketStatus::Planned,
            planned_start_at: input.planned_start_at,
            planned_end_at: input.planned_end_at,
            fact_start_at: None,
            fact_end_at: None,
            description: input.description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregate figures shown alongside a ticket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TicketMetrics {
    pub total_trips: usize,
    pub total_volume_m3: f64,
    pub has_violations: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TicketStatus::Planned.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
        assert!(TicketStatus::Completed.is_terminal());
        assert!(TicketStatus::Closed.is_terminal());
        assert!(TicketStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(TicketStatus::InProgress.to_string(), "IN_PROGRESS");
    }
}
