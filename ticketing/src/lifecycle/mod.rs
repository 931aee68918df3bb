//! Ticket lifecycle
//!
//! Tickets move PLANNED → IN_PROGRESS → COMPLETED → CLOSED, or to CANCELLED
//! before any work is recorded. Manual transitions carry ownership checks;
//! the auto-completion check is invoked after every trip or assignment change.

mod manager;
mod state;

pub use manager::{AutoComplete, CompletionBlockers, TicketLifecycle};
pub use state::{advance, is_legal_transition, IllegalTransition};
