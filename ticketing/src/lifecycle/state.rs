//! Ticket status graph and transition guard.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::TicketError;
use crate::model::{Ticket, TicketStatus};

/// Legal edges of the ticket state graph.
///
/// ```text
/// Planned    → InProgress | Cancelled
/// InProgress → Completed | Cancelled
/// Completed  → Closed
/// ```
pub fn is_legal_transition(from: TicketStatus, to: TicketStatus) -> bool {
    use TicketStatus::*;

    matches!(
        (from, to),
        (Planned, InProgress)
            | (Planned, Cancelled)
            | (InProgress, Cancelled)
            | (InProgress, Completed)
            | (Completed, Closed)
    )
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal ticket transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

impl From<IllegalTransition> for TicketError {
    fn from(err: IllegalTransition) -> Self {
        TicketError::conflict(err.to_string())
    }
}

/// Move `ticket` to `to`, stamping fact timestamps.
///
/// `fact_start_at` is set when the ticket first leaves PLANNED for work,
/// `fact_end_at` when it completes; neither is ever overwritten.
pub fn advance(
    ticket: &mut Ticket,
    to: TicketStatus,
    at: DateTime<Utc>,
) -> Result<(), IllegalTransition> {
    let from = ticket.status;
    if !is_legal_transition(from, to) {
        return Err(IllegalTransition { from, to });
    }

    match to {
        TicketStatus::InProgress if ticket.fact_start_at.is_none() => {
            ticket.fact_start_at = Some(at);
        }
        TicketStatus::Completed if ticket.fact_end_at.is_none() => {
            ticket.fact_end_at = Some(at);
        }
        _ => {}
    }
    ticket.status = to;
    ticket.updated_at = at;

    tracing::debug!(ticket_id = %ticket.id, from = %from, to = %to, "Ticket transition");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTicket;
    use chrono::Duration;
    use uuid::Uuid;

    fn ticket() -> Ticket {
        let now = Utc::now();
        Ticket::planned(
            NewTicket {
                cleaning_area_id: Uuid::new_v4(),
                contractor_id: Uuid::new_v4(),
                contract_id: Uuid::new_v4(),
                planned_start_at: now,
                planned_end_at: now + Duration::hours(8),
                description: String::new(),
            },
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use TicketStatus::*;
        let all = [Planned, InProgress, Completed, Closed, Cancelled];
        for from in [Closed, Cancelled] {
            for to in all {
                assert!(!is_legal_transition(from, to), "{from} → {to}");
            }
        }
        for to in all {
            if to != Closed {
                assert!(!is_legal_transition(Completed, to), "Completed → {to}");
            }
        }
    }

    #[test]
    fn test_cannot_skip_in_progress() {
        assert!(!is_legal_transition(
            TicketStatus::Planned,
            TicketStatus::Completed
        ));
        assert!(!is_legal_transition(
            TicketStatus::Planned,
            TicketStatus::Closed
        ));
        assert!(!is_legal_transition(
            TicketStatus::InProgress,
            TicketStatus::Planned
        ));
    }

    #[test]
    fn test_advance_stamps_facts_once() {
        let mut t = ticket();
        let start = Utc::now();
        advance(&mut t, TicketStatus::InProgress, start).unwrap();
        assert_eq!(t.fact_start_at, Some(start));

        let end = start + Duration::hours(3);
        advance(&mut t, TicketStatus::Completed, end).unwrap();
        assert_eq!(t.fact_start_at, Some(start));
        assert_eq!(t.fact_end_at, Some(end));

        advance(&mut t, TicketStatus::Closed, end + Duration::hours(1)).unwrap();
        assert_eq!(t.fact_end_at, Some(end));
    }

    #[test]
    fn test_illegal_advance_leaves_ticket_untouched() {
        let mut t = ticket();
        let before = t.clone();
        let err = advance(&mut t, TicketStatus::Closed, Utc::now()).unwrap_err();
        assert_eq!(err.from, TicketStatus::Planned);
        assert_eq!(t, before);
        assert!(TicketError::from(err).is_conflict());
    }
}
