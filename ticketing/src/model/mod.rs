//! Domain records: tickets, assignments, trips, vehicles, callers.

pub mod assignment;
pub mod fleet;
pub mod principal;
pub mod ticket;
pub mod trip;

pub use assignment::{DriverMarkStatus, TicketAssignment};
pub use fleet::{Vehicle, VehiclePosition};
pub use principal::{Principal, Role};
pub use ticket::{NewTicket, Ticket, TicketMetrics, TicketStatus};
pub use trip::{Trip, TripStatus};
