//! Operator CLI for the snow-removal ticketing core
//!
//! Every invocation loads the JSON snapshot named by `--state`, runs one
//! command against it and writes it back when the command can mutate state.
//! Results go to stdout as JSON; logs go to stderr. A failed command prints
//! `{"error": CODE, "message": ...}` and exits with status 1.
//!
//! # Usage
//!
//! ```bash
//! snowops --role issuer --org $ISSUER create-ticket --area $AREA \
//!     --contractor $CONTRACTOR --contract $CONTRACT \
//!     --start 2026-01-10T06:00:00Z --end 2026-01-10T18:00:00Z
//!
//! SNOWOPS_FEED_URL=http://anpr:8080 SNOWOPS_FEED_TOKEN=... \
//!     snowops --config snowops.toml --role driver --org $CONTRACTOR \
//!     --driver $DRIVER mark-completed $ASSIGNMENT
//! ```

mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use args::{Args, Command};
use ticketing::feed::HttpSensorFeed;
use ticketing::model::{NewTicket, Vehicle, VehiclePosition};
use ticketing::store::MemoryStore;
use ticketing::{EngineConfig, TicketError, TicketService, TripExit, TripReport, TripSignals};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::from_env().context("loading config from environment")?,
    };

    let store = MemoryStore::load(&args.state)
        .with_context(|| format!("loading state from {}", args.state.display()))?
        .shared();
    let feed = HttpSensorFeed::new(&config.feed).context("building sensor feed client")?;
    if !feed.is_configured() {
        tracing::warn!("Sensor feed URL not set; reconciled volumes will default to zero");
    }
    let service = TicketService::new(store.clone(), Arc::new(feed), &config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; abandoning in-flight feed queries");
            on_signal.cancel();
        }
    });

    let output = match run(&args, &service, &cancel).await {
        Ok(output) => output,
        Err(err) => {
            tracing::debug!(error = ?err, "Command failed");
            println!("{}", serde_json::to_string_pretty(&error_body(&err))?);
            std::process::exit(1);
        }
    };

    if args.command.mutates() {
        store
            .save(&args.state)
            .with_context(|| format!("saving state to {}", args.state.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(args: &Args, service: &TicketService, cancel: &CancellationToken) -> Result<Value> {
    let value = match &args.command {
        Command::CreateTicket {
            area,
            contractor,
            contract,
            start,
            end,
            description,
        } => {
            let input = NewTicket {
                cleaning_area_id: *area,
                contractor_id: *contractor,
                contract_id: *contract,
                planned_start_at: *start,
                planned_end_at: *end,
                description: description.clone(),
            };
            json!(service.create_ticket(&args.principal()?, input).await?)
        }
        Command::Cancel { ticket } => json!(service.cancel(&args.principal()?, *ticket).await?),
        Command::Complete { ticket } => {
            json!(service.complete(&args.principal()?, *ticket).await?)
        }
        Command::Close { ticket } => json!(service.close(&args.principal()?, *ticket).await?),
        Command::Assign {
            ticket,
            driver_id,
            vehicle,
        } => json!(
            service
                .assign(&args.principal()?, *ticket, *driver_id, *vehicle)
                .await?
        ),
        Command::Unassign { assignment } => {
            json!(service.unassign(&args.principal()?, *assignment).await?)
        }
        Command::MarkInWork { assignment } => {
            json!(service.mark_in_work(&args.principal()?, *assignment).await?)
        }
        Command::MarkCompleted { assignment } => json!(
            service
                .mark_completed(&args.principal()?, *assignment, cancel)
                .await?
        ),
        Command::Reconcile { assignment } => {
            let reconciliation = service.reconcile(*assignment, cancel).await?;
            json!({
                "reconciliation": reconciliation,
                "feed_health": service.feed_health(),
            })
        }
        Command::RecordTrip { file } => {
            let report: TripReport = read_json(file)?;
            json!(service.record_trip(report).await?)
        }
        Command::CloseTrip {
            trip,
            exit_at,
            exit_lpr_event,
            exit_volume_event,
            exit_volume,
        } => {
            let exit = TripExit {
                exit_at: exit_at.unwrap_or_else(Utc::now),
                exit_lpr_event_id: *exit_lpr_event,
                exit_volume_event_id: *exit_volume_event,
                detected_volume_exit: *exit_volume,
            };
            json!(service.close_trip(*trip, exit).await?)
        }
        Command::Classify { file } => {
            let signals: TripSignals = read_json(file)?;
            let verdict = service.classify(&signals);
            json!({
                "status": verdict.status,
                "rule": verdict.rule.map(|rule| rule.as_str()),
                "reason": verdict.reason(),
            })
        }
        Command::Show { ticket } => json!({
            "ticket": service.ticket(*ticket).await?,
            "metrics": service.metrics(*ticket).await?,
            "assignments": service.assignments(*ticket).await?,
            "trips": service.trips(*ticket).await?,
        }),
        Command::AddVehicle {
            contractor,
            plate,
            body_volume,
        } => {
            let vehicle = Vehicle {
                id: Uuid::new_v4(),
                contractor_id: *contractor,
                plate_number: plate.clone(),
                body_volume_m3: *body_volume,
            };
            json!(service.add_vehicle(vehicle).await?)
        }
        Command::RecordPosition {
            vehicle,
            lat,
            lon,
            at,
            outside_area,
            outside_polygon,
        } => {
            let position = VehiclePosition {
                vehicle_id: *vehicle,
                latitude: *lat,
                longitude: *lon,
                recorded_at: at.unwrap_or_else(Utc::now),
                inside_cleaning_area: !outside_area,
                inside_polygon: !outside_polygon,
            };
            service.record_position(position.clone()).await?;
            json!(position)
        }
    };
    Ok(value)
}

/// JSON error report; core errors carry their stable code.
fn error_body(err: &anyhow::Error) -> Value {
    let code = err
        .downcast_ref::<TicketError>()
        .map_or("INTERNAL", TicketError::code);
    json!({ "error": code, "message": format!("{:#}", err) })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
