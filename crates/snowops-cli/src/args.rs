//! Command-line surface

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use ticketing::model::{Principal, Role};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "snowops", author, version, about, long_about = None)]
pub struct Args {
    /// JSON snapshot holding tickets, assignments, trips and vehicles
    #[arg(long, global = true, default_value = "snowops-state.json")]
    pub state: PathBuf,

    /// TOML engine configuration (falls back to SNOWOPS_* environment variables)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Caller role: issuer, contractor, driver, city_admin, landfill
    #[arg(long, global = true)]
    pub role: Option<Role>,

    /// Caller organization
    #[arg(long, global = true)]
    pub org: Option<Uuid>,

    /// Caller user id (random when omitted)
    #[arg(long, global = true)]
    pub user: Option<Uuid>,

    /// Driver id, required with --role driver
    #[arg(long, global = true)]
    pub driver: Option<Uuid>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Issue a new ticket (issuer)
    CreateTicket {
        #[arg(long)]
        area: Uuid,
        #[arg(long)]
        contractor: Uuid,
        #[arg(long)]
        contract: Uuid,
        /// RFC 3339 planned start
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 planned end
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Withdraw a ticket before work starts (issuer)
    Cancel { ticket: Uuid },
    /// Complete a ticket manually (contractor)
    Complete { ticket: Uuid },
    /// Accept a completed ticket (issuer)
    Close { ticket: Uuid },
    /// Put a driver and vehicle on a ticket (contractor)
    Assign {
        ticket: Uuid,
        #[arg(long)]
        driver_id: Uuid,
        #[arg(long)]
        vehicle: Uuid,
    },
    /// Remove an assignment (contractor)
    Unassign { assignment: Uuid },
    /// Driver starts work on an assignment
    MarkInWork { assignment: Uuid },
    /// Driver finishes an assignment; reconciles volume from the sensor feed
    MarkCompleted { assignment: Uuid },
    /// Re-run volume reconciliation for a finished assignment
    Reconcile { assignment: Uuid },
    /// Record a sensor trip from a JSON entry report
    RecordTrip { file: PathBuf },
    /// Close an open trip with its exit-side readings
    CloseTrip {
        trip: Uuid,
        /// RFC 3339 exit time, defaults to now
        #[arg(long)]
        exit_at: Option<DateTime<Utc>>,
        #[arg(long)]
        exit_lpr_event: Option<Uuid>,
        #[arg(long)]
        exit_volume_event: Option<Uuid>,
        /// Volume still in the body on exit, m³
        #[arg(long)]
        exit_volume: Option<f64>,
    },
    /// Classify a JSON file of trip signals without touching state
    Classify { file: PathBuf },
    /// Print a ticket with its metrics, assignments and trips
    Show { ticket: Uuid },
    /// Register a vehicle
    AddVehicle {
        #[arg(long)]
        contractor: Uuid,
        #[arg(long)]
        plate: String,
        /// Nominal body capacity, m³
        #[arg(long)]
        body_volume: Option<f64>,
    },
    /// Record a GPS fix for a vehicle
    RecordPosition {
        #[arg(long)]
        vehicle: Uuid,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// RFC 3339 fix time, defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = false)]
        outside_area: bool,
        #[arg(long, default_value_t = false)]
        outside_polygon: bool,
    },
}

impl Command {
    /// Whether the command can change stored state.
    pub fn mutates(&self) -> bool {
        !matches!(self, Self::Classify { .. } | Self::Show { .. })
    }
}

impl Args {
    /// Caller identity from the principal flags.
    pub fn principal(&self) -> Result<Principal> {
        let Some(role) = self.role else {
            bail!("--role is required for this command");
        };
        let Some(org_id) = self.org else {
            bail!("--org is required for this command");
        };
        if role == Role::Driver && self.driver.is_none() {
            bail!("--driver is required with --role driver");
        }
        Ok(Principal {
            user_id: self.user.unwrap_or_else(Uuid::new_v4),
            role,
            org_id,
            driver_id: self.driver,
        })
    }
}
